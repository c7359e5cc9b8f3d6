//! Connection settings: where the RTI node lives, which logical-time
//! implementation the federation uses, and how callbacks are dispatched.

use std::path::PathBuf;

use cadence_core::TimeKind;
use cadence_federation::FedError;

/// How callbacks reach the federate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackModel {
    /// The federate pumps callbacks through `evoke_callback` /
    /// `evoke_multiple_callbacks`.
    #[default]
    Evoked,
    /// One spawned task repeatedly invokes the same pump.
    Immediate,
}

#[derive(Debug, Clone)]
pub struct ConnectSettings {
    /// `host:port` of the federation server.
    pub rti_node: String,
    pub time_kind: TimeKind,
    pub callback_model: CallbackModel,
    /// FOM module paths; opaque to the core.
    pub fom_modules: Vec<PathBuf>,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            rti_node: "127.0.0.1:14321".to_owned(),
            time_kind: TimeKind::HlaInteger64Time,
            callback_model: CallbackModel::Evoked,
            fom_modules: Vec::new(),
        }
    }
}

impl ConnectSettings {
    /// Apply `key=value` local settings, the form CLI tools pass through.
    ///
    /// Recognized keys: `rtinode`, `logicalTimeImplementationName` (bare or
    /// under a `localsettings.` prefix), `callbackModel`, `foM`.
    pub fn apply_kv(&mut self, pair: &str) -> Result<(), FedError> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| FedError::RtiInternalError(format!("malformed setting: {pair}")))?;
        let key = key.strip_prefix("localsettings.").unwrap_or(key);
        match key {
            "rtinode" => self.rti_node = value.to_owned(),
            "logicalTimeImplementationName" => {
                self.time_kind = TimeKind::from_factory_name(value)
                    .ok_or_else(|| FedError::CouldNotCreateLogicalTimeFactory(value.to_owned()))?;
            }
            "callbackModel" => {
                self.callback_model = match value {
                    "HLA_EVOKED" => CallbackModel::Evoked,
                    "HLA_IMMEDIATE" => CallbackModel::Immediate,
                    other => {
                        return Err(FedError::RtiInternalError(format!(
                            "unknown callback model: {other}"
                        )))
                    }
                };
            }
            "foM" => self.fom_modules.push(PathBuf::from(value)),
            other => {
                return Err(FedError::RtiInternalError(format!(
                    "unknown setting: {other}"
                )))
            }
        }
        Ok(())
    }

    pub fn from_kv<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self, FedError> {
        let mut settings = Self::default();
        for pair in pairs {
            settings.apply_kv(pair)?;
        }
        Ok(settings)
    }
}

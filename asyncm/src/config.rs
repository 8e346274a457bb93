use core::num::NonZeroUsize;

/// Tunables inherited by every node of a Progress tree.
///
/// Channels and emitters are unbounded and never refuse or drop a value; the
/// high-water marks only make a runaway producer visible in the logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Buffered values in a single `Channel` at which a warning is logged.
    #[cfg_attr(feature = "serde", serde(default))]
    pub channel_high_water: Option<NonZeroUsize>,
    /// Pending listeners on a single `Emitter` at which a warning is logged.
    #[cfg_attr(feature = "serde", serde(default))]
    pub emitter_high_water: Option<NonZeroUsize>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warn whenever a channel buffer grows to `limit` values.
    pub fn with_channel_high_water(mut self, limit: NonZeroUsize) -> Self {
        self.channel_high_water = Some(limit);
        self
    }

    /// Warn whenever an emitter accumulates `limit` pending listeners.
    pub fn with_emitter_high_water(mut self, limit: NonZeroUsize) -> Self {
        self.emitter_high_water = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = Config::new().with_channel_high_water(NonZeroUsize::new(64).unwrap());
        assert_eq!(config.channel_high_water.map(NonZeroUsize::get), Some(64));
        assert!(config.emitter_high_water.is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn missing_fields_default() {
        let config: Config = serde_json::from_str(r#"{ "emitter_high_water": 8 }"#).unwrap();
        assert_eq!(config.emitter_high_water.map(NonZeroUsize::get), Some(8));
        assert!(config.channel_high_water.is_none());
    }
}

//! Control parameters for a decoder instance.
//!
//! A plain, `Copy` configuration struct built with a clamping
//! constructor rather than validated at each call site.

use crate::types::{CcPreference, DolbySurround, InputType, DEFAULT_FIFO_BYTE_CEILING};
use std::time::Duration;

/// Per-decoder configuration, set at creation and otherwise immutable.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub hardware_decoding: bool,
    pub cc_preference: CcPreference,
    pub input_type: InputType,
    pub force_dolby_surround: DolbySurround,
    pub fifo_byte_ceiling: usize,
    pub subtitle_wait_timeout: Duration,
}

impl Config {
    pub fn new(input_type: InputType) -> Self {
        Self {
            hardware_decoding: true,
            cc_preference: CcPreference::Cea708,
            input_type,
            force_dolby_surround: DolbySurround::Auto,
            fifo_byte_ceiling: DEFAULT_FIFO_BYTE_CEILING,
            subtitle_wait_timeout: Duration::from_millis(30 * 200),
        }
    }

    pub fn with_fifo_byte_ceiling(mut self, bytes: usize) -> Self {
        self.fifo_byte_ceiling = bytes.max(1);
        self
    }

    pub fn with_hardware_decoding(mut self, enabled: bool) -> Self {
        self.hardware_decoding = enabled;
        self
    }

    pub fn with_dolby_surround(mut self, mode: DolbySurround) -> Self {
        self.force_dolby_surround = mode;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(InputType::Playback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.input_type, InputType::Playback);
        assert_eq!(cfg.force_dolby_surround, DolbySurround::Auto);
        assert_eq!(cfg.fifo_byte_ceiling, DEFAULT_FIFO_BYTE_CEILING);
    }

    #[test]
    fn byte_ceiling_clamped_to_at_least_one() {
        let cfg = Config::default().with_fifo_byte_ceiling(0);
        assert_eq!(cfg.fifo_byte_ceiling, 1);
    }
}

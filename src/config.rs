//! Service configuration
//!
//! The configuration is owned by the integrator and copied into the owner task at start-up.
//! The engine only reads it; a replacement arrives as `Message::UpdateConfig`.

use crate::{
    ServiceError,
    constants::{
        DEFAULT_INQUIRY_INTERVAL, DEFAULT_INQUIRY_WINDOW, DEFAULT_PAGE_INTERVAL,
        DEFAULT_PAGE_WINDOW, MAX_RECORDS,
    },
};

/// Inquiry/page scan type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub enum ScanType {
    /// Standard scan
    #[default]
    Standard,
    /// Interlaced scan
    Interlaced,
}

/// Scan timing for one scan mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct ScanParams {
    /// Inquiry scan window in slots
    pub inquiry_window: u16,
    /// Inquiry scan interval in slots
    pub inquiry_interval: u16,
    /// Inquiry scan type
    pub inquiry_type: ScanType,
    /// Page scan window in slots
    pub page_window: u16,
    /// Page scan interval in slots
    pub page_interval: u16,
    /// Page scan type
    pub page_type: ScanType,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            inquiry_window: DEFAULT_INQUIRY_WINDOW,
            inquiry_interval: DEFAULT_INQUIRY_INTERVAL,
            inquiry_type: ScanType::Standard,
            page_window: DEFAULT_PAGE_WINDOW,
            page_interval: DEFAULT_PAGE_INTERVAL,
            page_type: ScanType::Standard,
        }
    }
}

impl ScanParams {
    /// Replace zero windows/intervals with the defaults
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.inquiry_window == 0 || self.inquiry_interval == 0 {
            self.inquiry_window = defaults.inquiry_window;
            self.inquiry_interval = defaults.inquiry_interval;
        }
        if self.page_window == 0 || self.page_interval == 0 {
            self.page_window = defaults.page_window;
            self.page_interval = defaults.page_interval;
        }
        self
    }

    fn is_valid(&self) -> bool {
        self.inquiry_window <= self.inquiry_interval && self.page_window <= self.page_interval
    }
}

/// Scan timing profile identifiers (0..6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum ScanMode {
    /// Boot default timing
    DefaultInquiryPage = 0,
    /// Fast page scan
    FastPage = 1,
    /// Fast page scan, extended window
    FastPageEx = 2,
    /// Normal page scan
    NormalPage = 3,
    /// Normal page scan, power saving variant used with a paired TWS peer
    NormalPageS3 = 4,
    /// Normal page scan while audio is active
    NormalPageEx = 5,
    /// Fast inquiry and page scan used for pairing
    FastInquiryPage = 6,
}

impl ScanMode {
    /// Number of scan modes
    pub const COUNT: usize = 7;

    /// Scan mode from its id
    ///
    /// # Errors
    /// Returns `InvalidArgument` for ids outside 0..6
    pub fn from_id(id: u8) -> Result<Self, ServiceError> {
        Ok(match id {
            0 => Self::DefaultInquiryPage,
            1 => Self::FastPage,
            2 => Self::FastPageEx,
            3 => Self::NormalPage,
            4 => Self::NormalPageS3,
            5 => Self::NormalPageEx,
            6 => Self::FastInquiryPage,
            _ => return Err(ServiceError::InvalidArgument),
        })
    }

    /// Table index of this mode
    #[must_use]
    pub const fn id(self) -> usize {
        self as usize
    }
}

/// Scan parameters per scan mode id
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct ScanParamTable {
    entries: [ScanParams; ScanMode::COUNT],
}

impl Default for ScanParamTable {
    fn default() -> Self {
        Self {
            entries: [ScanParams::default(); ScanMode::COUNT],
        }
    }
}

impl ScanParamTable {
    /// Parameters for a scan mode
    #[must_use]
    pub fn get(&self, mode: ScanMode) -> ScanParams {
        self.entries[mode.id()]
    }

    /// Set the parameters of one scan mode, filling unset fields with defaults
    pub fn set(&mut self, mode: ScanMode, params: ScanParams) {
        self.entries[mode.id()] = params.with_defaults();
    }
}

/// Profiles whose message handlers are registered at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct ProfileSet {
    /// A2DP sink
    pub a2dp: bool,
    /// AVRCP controller
    pub avrcp: bool,
    /// HFP hands-free
    pub hfp: bool,
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self {
            a2dp: true,
            avrcp: true,
            hfp: true,
        }
    }
}

/// Feature configuration read by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct ServiceConfig {
    /// Phones that may be connected at the same time
    pub max_phones: u8,
    /// Profiles the product supports
    pub profiles: ProfileSet,
    /// Music volume returned for devices without a saved entry
    pub default_music_volume: u8,
    /// Call volume returned for devices without a saved entry
    pub default_call_volume: u8,
    /// Enable the sniff controller
    pub sniff_enable: bool,
    /// Idle time before sniff is requested
    pub idle_enter_sniff_ms: u32,
    /// Sniff interval requested for a single phone
    pub sniff_interval_ms: u16,
    /// Time a stopped stream keeps its stop-wait before re-arbitration
    pub a2dp_stopped_delay_ms: u32,
    /// A newly started phone pre-empts the playing one
    pub stop_another_when_one_playing: bool,
    /// Filter prompt tones before promoting a second phone's stream
    pub prompt_tone_filter: bool,
    /// Be discoverable after boot when no pairing flag is set
    pub default_state_discoverable: bool,
    /// Seconds to wait for the first connection after boot (0 disables the wait state)
    pub default_state_wait_connect_sec: u8,
    /// Stop being discoverable once a phone is connected
    pub not_discoverable_when_connected: bool,
    /// Pair key mode (2 selects inquiry during TWS search)
    pub pair_key_mode: u8,
    /// Search for the TWS peer after power on
    pub power_on_auto_pair_search: bool,
    /// TWS advanced pairing mode (no limited inquiry, no S3 page timing)
    pub tws_advanced_mode: bool,
    /// Product supports TWS
    pub support_tws: bool,
    /// Scan parameters per scan mode
    pub scan_params: ScanParamTable,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_phones: 2,
            profiles: ProfileSet::default(),
            default_music_volume: 15,
            default_call_volume: 10,
            sniff_enable: true,
            idle_enter_sniff_ms: 5000,
            sniff_interval_ms: 500,
            a2dp_stopped_delay_ms: 1500,
            stop_another_when_one_playing: false,
            prompt_tone_filter: false,
            default_state_discoverable: true,
            default_state_wait_connect_sec: 0,
            not_discoverable_when_connected: false,
            pair_key_mode: 0,
            power_on_auto_pair_search: false,
            tws_advanced_mode: false,
            support_tws: true,
            scan_params: ScanParamTable::default(),
        }
    }
}

impl ServiceConfig {
    /// Check the configuration before the owner task starts
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the phone limit does not fit the record pool or a
    /// scan window exceeds its interval
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.max_phones == 0 || usize::from(self.max_phones) > MAX_RECORDS {
            return Err(ServiceError::InvalidArgument);
        }
        if !self.scan_params.entries.iter().all(ScanParams::is_valid) {
            return Err(ServiceError::InvalidArgument);
        }
        Ok(())
    }

    /// Whether pairing searches for the TWS peer with inquiry scan enabled
    #[must_use]
    pub fn tws_search_uses_inquiry(&self) -> bool {
        self.pair_key_mode == 2 || self.power_on_auto_pair_search
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(ServiceConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_phone_limit_checked() {
        let config = ServiceConfig {
            max_phones: 0,
            ..ServiceConfig::default()
        };
        assert_eq!(config.validate(), Err(ServiceError::InvalidArgument));

        let config = ServiceConfig {
            max_phones: 4,
            ..ServiceConfig::default()
        };
        assert_eq!(config.validate(), Err(ServiceError::InvalidArgument));
    }

    #[test]
    fn test_scan_param_defaults_filled() {
        let mut table = ScanParamTable::default();
        table.set(
            ScanMode::FastPage,
            ScanParams {
                page_window: 0x24,
                page_interval: 0x200,
                inquiry_window: 0,
                inquiry_interval: 0,
                ..ScanParams::default()
            },
        );

        let params = table.get(ScanMode::FastPage);
        assert_eq!(params.page_window, 0x24);
        assert_eq!(params.page_interval, 0x200);
        assert_eq!(params.inquiry_window, DEFAULT_INQUIRY_WINDOW);
        assert_eq!(params.inquiry_interval, DEFAULT_INQUIRY_INTERVAL);
    }

    #[test]
    fn test_window_larger_than_interval_rejected() {
        let mut config = ServiceConfig::default();
        config.scan_params.entries[3].page_window = 0x900;
        assert_eq!(config.validate(), Err(ServiceError::InvalidArgument));
    }

    #[test]
    fn test_scan_mode_ids() {
        assert_eq!(ScanMode::from_id(6), Ok(ScanMode::FastInquiryPage));
        assert_eq!(ScanMode::NormalPageS3.id(), 4);
        assert_eq!(ScanMode::from_id(7), Err(ServiceError::InvalidArgument));
    }
}

//! `Duetbird` Constants
//!
//! Capacities of the bounded tables, timer periods of the periodic checks and
//! the default values used when the configuration leaves a field unset.

/// Number of Connection Record slots (phones plus the TWS peer)
pub const MAX_RECORDS: usize = 3;

/// Depth of the owner task's message queue
pub const MAX_MESSAGES: usize = 16;

/// Depth of the request/response queues used by the ask-pattern API
pub const MAX_REQUESTS: usize = 4;

/// Depth of the application notification queue
pub const MAX_NOTIFICATIONS: usize = 16;

/// Host commands a single handler invocation may queue for the controller
pub const MAX_HOST_COMMANDS: usize = 16;

/// Incoming connection requests remembered until the link completes
pub const MAX_CONNECT_REQUESTS: usize = 3;

/// Number of concurrently armed software timers
pub const MAX_TIMERS: usize = 16;

/// Capacity of the saved volume table
pub const SAVED_VOLUME_CAPACITY: usize = 8;

/// Maximum device name length in bytes
pub const MAX_DEVICE_NAME_LENGTH: usize = 32;

/// `BD_ADDR` length in bytes
pub const BD_ADDR_LENGTH: usize = 6;

/// Sniff controller tick
pub const SNIFF_CHECK_INTERVAL_MS: u32 = 100;

/// An unacknowledged sniff request is abandoned after this long
pub const SNIFF_ENTER_TIMEOUT_MS: u32 = 1100;

/// Sniff interval shared by the TWS link and dual-phone links
pub const SNIFF_FAST_INTERVAL_MS: u16 = 200;

/// Lower bound (exclusive) of the active phone interval the TWS link follows, in slots (175 ms)
pub const SNIFF_TWS_FOLLOW_MIN_SLOTS: u16 = 280;

/// Upper bound (exclusive) of the active phone interval the TWS link follows, in slots (225 ms)
pub const SNIFF_TWS_FOLLOW_MAX_SLOTS: u16 = 360;

/// Duration of one baseband slot in microseconds
pub const BASEBAND_SLOT_US: u32 = 625;

/// A deferred disconnect (sniff exit or AVRCP pause first) is forced after this long
pub const DISCONNECT_WAIT_MS: u32 = 1000;

/// Link-time adjuster tick
pub const LINK_ADJUST_INTERVAL_MS: u32 = 50;

/// Link-time budget granted to the active phone while another link competes
pub const LINK_TIME_BOOST: u8 = 20;

/// Scan policy re-evaluation is coalesced to at most one write per window
pub const SCAN_DEBOUNCE_MS: u32 = 200;

/// A2DP stop/call wait check tick
pub const A2DP_CHECK_INTERVAL_MS: u32 = 50;

/// A call starting within this window after a stop converts stop-wait into call-wait
pub const A2DP_CALL_GRACE_MS: u32 = 500;

/// Prompt tone filter play-position poll period
pub const PROMPT_TONE_POLL_MS: u32 = 200;

/// Unchanged-position samples before a stream is accepted anyway (2 s)
pub const PROMPT_TONE_KEEP_SAMPLES: u8 = 10;

/// Position changes needed to accept a stream as real playback
pub const PROMPT_TONE_CHANGE_SAMPLES: u8 = 3;

/// Deferral applied to AVRCP absolute volume requests
pub const AVRCP_VOLUME_DELAY_MS: u32 = 50;

/// Filtered absolute volume requests after which the pending value is applied at once
pub const AVRCP_VOLUME_FILTER_MAX: u8 = 3;

/// Window in which a stream start waits for AVRCP to connect
pub const AVRCP_CONNECTING_PENDING_MS: u32 = 2000;

/// Window in which a stream start waits for AVRCP to report playing
pub const AVRCP_PLAYING_PENDING_MS: u32 = 1000;

/// General Inquiry Access Code (GIAC)
pub const GIAC: [u8; 3] = [0x33, 0x8B, 0x9E];

/// Limited Inquiry Access Code (LIAC)
pub const LIAC: [u8; 3] = [0x00, 0x8B, 0x9E];

/// Default inquiry scan window (slots)
pub const DEFAULT_INQUIRY_WINDOW: u16 = 0x0012;

/// Default inquiry scan interval (slots)
pub const DEFAULT_INQUIRY_INTERVAL: u16 = 0x1000;

/// Default page scan window (slots)
pub const DEFAULT_PAGE_WINDOW: u16 = 0x0012;

/// Default page scan interval (slots)
pub const DEFAULT_PAGE_INTERVAL: u16 = 0x0800;

/// PnP vendor id reported by iOS devices
pub const IOS_VENDOR_ID: u16 = 0x004C;

/// Major device class "computer" in the class of device field
pub const MAJOR_CLASS_COMPUTER: u8 = 0x01;

/// Default HFP codec (CVSD)
pub const HFP_CODEC_CVSD: u8 = 0x01;

/// Default HFP sample rate in kHz
pub const HFP_DEFAULT_SAMPLE_RATE_KHZ: u8 = 8;

/// Persistence key of the saved volume table
pub const VOLUME_STORE_KEY: &str = "bt_vol";

/// Bytes per persisted saved volume entry (address, music, call)
pub const VOLUME_ENTRY_LENGTH: usize = BD_ADDR_LENGTH + 2;

/// HCI reason "connection timeout" (supervision timeout)
pub const HCI_CONNECTION_TIMEOUT: u8 = 0x08;

/// HCI reason used to refuse a page when no phone slot is left
pub const HCI_LIMITED_RESOURCES: u8 = 0x0D;

/// Standard packet types for ACL connections (DM1, DM3, DM5, DH1, DH3, DH5)
pub const DEFAULT_PACKET_TYPES: u16 = 0xCC18;

/// Page scan repetition mode R1
pub const PAGE_SCAN_REPETITION_MODE_R1: u8 = 0x01;

/// Reserved field value
pub const RESERVED_FIELD: u8 = 0x00;

/// No clock offset specified
pub const NO_CLOCK_OFFSET: u16 = 0x0000;

/// Allow role switch during connection
pub const ALLOW_ROLE_SWITCH: u8 = 0x01;

//! Scan Policy Engine
//!
//! Discoverable and connectable are computed by two ordered rule lists. Each rule is a
//! pure function of the pairing flags, the device counts and the configuration; the first
//! rule that returns a value wins. The decision is only written to the controller when
//! it differs from the last applied one, and scanning is always disabled before the scan
//! timing changes.
//!
//! Re-evaluation after an input change is debounced by a restart-on-change timer.

use crate::{
    ControllerCommand, Message, ServiceConfig, ServiceError,
    config::{ScanMode, ScanParams},
    constants::{GIAC, LIAC, SCAN_DEBOUNCE_MS},
    hfp::ScoState,
    rdm::{DeviceKind, TwsRole},
    service::Service,
    timer::{Millis, TimerId, TimerKind},
};
use heapless::Vec;

/// Visibility requested by an override
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct Visibility {
    /// Inquiry scan
    pub discoverable: bool,
    /// Page scan
    pub connectable: bool,
    /// Scan timing profile
    pub scan_mode: ScanMode,
}

/// One change of a scan policy input
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ScanInput {
    /// User pairing mode
    PairMode(bool),
    /// Searching for the TWS peer
    TwsSearch(bool),
    /// Reconnecting to a known phone
    Reconnect(bool),
    /// Waiting for the first connection after boot
    WaitConnect(bool),
    /// Neither discoverable nor connectable
    NoDiscoverNoConnect(bool),
    /// An outgoing connection attempt is pending
    ConnectPending(bool),
    /// Broadcast audio owns the radio
    Auracast(bool),
    /// A TWS peer is paired
    TwsPaired(bool),
    /// The TWS link is being re-established
    Reconnecting(bool),
    /// User visibility override (`None` clears it)
    UserVisibility(Option<Visibility>),
    /// Internal service visibility override (`None` clears it)
    ServiceVisibility(Option<Visibility>),
}

/// Current value of every scan policy input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct ScanInputs {
    /// User pairing mode
    pub pair_mode: bool,
    /// Searching for the TWS peer
    pub tws_search: bool,
    /// Reconnecting to a known phone
    pub reconnect: bool,
    /// Waiting for the first connection after boot
    pub wait_connect: bool,
    /// Neither discoverable nor connectable
    pub nodisc_nocon: bool,
    /// An outgoing connection attempt is pending
    pub connect_pending: bool,
    /// Broadcast audio owns the radio
    pub auracast: bool,
    /// A TWS peer is paired
    pub tws_paired: bool,
    /// The TWS link is being re-established
    pub reconnecting: bool,
    /// User visibility override
    pub user: Option<Visibility>,
    /// Internal service visibility override
    pub service: Option<Visibility>,
}

impl ScanInputs {
    /// Apply one input change, returning whether anything changed
    pub fn apply(&mut self, input: ScanInput) -> bool {
        let before = *self;
        match input {
            ScanInput::PairMode(on) => self.pair_mode = on,
            ScanInput::TwsSearch(on) => self.tws_search = on,
            ScanInput::Reconnect(on) => self.reconnect = on,
            ScanInput::WaitConnect(on) => self.wait_connect = on,
            ScanInput::NoDiscoverNoConnect(on) => self.nodisc_nocon = on,
            ScanInput::ConnectPending(on) => self.connect_pending = on,
            ScanInput::Auracast(on) => self.auracast = on,
            ScanInput::TwsPaired(on) => self.tws_paired = on,
            ScanInput::Reconnecting(on) => self.reconnecting = on,
            ScanInput::UserVisibility(visibility) => self.user = visibility,
            ScanInput::ServiceVisibility(visibility) => self.service = visibility,
        }
        *self != before
    }
}

/// Device-derived inputs of the decision tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanContext {
    /// ACL-connected phones
    pub connected_phones: usize,
    /// Any ACL-connected device, TWS peer included
    pub connected_devices: usize,
    /// Local TWS role
    pub local_role: TwsRole,
    /// A phone has an open A2DP stream
    pub media_active: bool,
    /// A phone owns a live SCO link
    pub sco_active: bool,
}

/// Inquiry access code scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum InquiryScope {
    /// General inquiry (GIAC)
    General,
    /// Limited inquiry (LIAC)
    Limited,
}

impl InquiryScope {
    /// LAP written to the controller
    #[must_use]
    pub const fn lap(self) -> [u8; 3] {
        match self {
            Self::General => GIAC,
            Self::Limited => LIAC,
        }
    }
}

/// Output of the decision tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct ScanDecision {
    /// Inquiry scan
    pub discoverable: bool,
    /// Page scan
    pub connectable: bool,
    /// Inquiry access code
    pub scope: InquiryScope,
    /// Scan timing profile
    pub scan_mode: ScanMode,
}

impl ScanDecision {
    fn scanning(&self) -> bool {
        self.discoverable || self.connectable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Discoverability {
    discoverable: bool,
    scan_mode: Option<ScanMode>,
    scope: InquiryScope,
}

impl Discoverability {
    const fn new(discoverable: bool, scan_mode: Option<ScanMode>) -> Self {
        Self {
            discoverable,
            scan_mode,
            scope: InquiryScope::General,
        }
    }
}

type DiscoverableRule = fn(&ScanInputs, &ScanContext, &ServiceConfig) -> Option<Discoverability>;

/// Scan timing used with a paired TWS peer outside advanced mode
fn tws_paired_mode(inputs: &ScanInputs, ctx: &ScanContext, config: &ServiceConfig) -> Option<ScanMode> {
    if !inputs.tws_paired || config.tws_advanced_mode {
        return None;
    }
    Some(if ctx.sco_active {
        ScanMode::NormalPageEx
    } else if !ctx.media_active && !inputs.reconnecting {
        ScanMode::NormalPageS3
    } else {
        ScanMode::NormalPage
    })
}

fn at_capacity(ctx: &ScanContext, config: &ServiceConfig) -> bool {
    ctx.connected_phones >= usize::from(config.max_phones)
}

const DISCOVERABLE_RULES: [DiscoverableRule; 12] = [
    |inputs, _, _| inputs.user.map(|v| Discoverability::new(v.discoverable, Some(v.scan_mode))),
    |inputs, _, _| inputs.service.map(|v| Discoverability::new(v.discoverable, Some(v.scan_mode))),
    |_, ctx, config| at_capacity(ctx, config).then_some(Discoverability::new(false, None)),
    |inputs, _, _| inputs.connect_pending.then_some(Discoverability::new(false, None)),
    |_, ctx, _| (ctx.local_role == TwsRole::Slave).then_some(Discoverability::new(false, None)),
    |inputs, _, _| inputs.nodisc_nocon.then_some(Discoverability::new(false, None)),
    |inputs, _, config| {
        inputs.tws_search.then(|| Discoverability {
            discoverable: config.tws_search_uses_inquiry(),
            scan_mode: Some(ScanMode::FastInquiryPage),
            scope: if config.tws_advanced_mode {
                InquiryScope::General
            } else {
                InquiryScope::Limited
            },
        })
    },
    |inputs, ctx, _| {
        inputs.pair_mode.then(|| {
            let mode = if ctx.connected_phones == 0 || !(ctx.media_active || ctx.sco_active) {
                ScanMode::FastInquiryPage
            } else if ctx.sco_active {
                ScanMode::NormalPageEx
            } else {
                ScanMode::NormalPage
            };
            Discoverability::new(true, Some(mode))
        })
    },
    |inputs, ctx, config| {
        inputs
            .reconnect
            .then(|| Discoverability::new(true, tws_paired_mode(inputs, ctx, config)))
    },
    |inputs, ctx, config| {
        inputs.wait_connect.then(|| {
            let mode = tws_paired_mode(inputs, ctx, config).unwrap_or(ScanMode::FastPageEx);
            Discoverability::new(config.default_state_discoverable, Some(mode))
        })
    },
    |inputs, ctx, config| {
        (config.default_state_discoverable && config.default_state_wait_connect_sec == 0).then(|| {
            let hide = ctx.connected_phones > 0 && config.not_discoverable_when_connected;
            Discoverability::new(!hide, tws_paired_mode(inputs, ctx, config))
        })
    },
    |_, _, _| Some(Discoverability::new(false, None)),
];

type ConnectableRule = fn(&ScanInputs, &ScanContext, &ServiceConfig) -> Option<bool>;

const CONNECTABLE_RULES: [ConnectableRule; 8] = [
    |inputs, _, _| inputs.user.map(|v| v.connectable),
    |inputs, _, _| inputs.service.map(|v| v.connectable),
    |_, ctx, config| at_capacity(ctx, config).then_some(false),
    |inputs, ctx, _| (ctx.connected_devices > 0 && inputs.auracast).then_some(false),
    |inputs, _, _| inputs.connect_pending.then_some(false),
    |_, ctx, _| (ctx.local_role == TwsRole::Slave).then_some(false),
    |inputs, _, _| inputs.nodisc_nocon.then_some(false),
    |_, _, _| Some(true),
];

/// Evaluate both decision tables
#[must_use]
pub fn decide(inputs: &ScanInputs, ctx: &ScanContext, config: &ServiceConfig) -> ScanDecision {
    let discoverability = DISCOVERABLE_RULES
        .iter()
        .find_map(|rule| rule(inputs, ctx, config))
        .unwrap_or(Discoverability::new(false, None));
    let connectable = CONNECTABLE_RULES
        .iter()
        .find_map(|rule| rule(inputs, ctx, config))
        .unwrap_or(true);
    let scan_mode = discoverability
        .scan_mode
        .or_else(|| tws_paired_mode(inputs, ctx, config))
        .unwrap_or(ScanMode::DefaultInquiryPage);

    ScanDecision {
        discoverable: discoverability.discoverable,
        connectable,
        scope: discoverability.scope,
        scan_mode,
    }
}

/// Applied scan state reported to the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct ScanSnapshot {
    /// Last decision written to the controller, `None` before the first write
    pub applied: Option<ScanDecision>,
    /// Current inputs
    pub inputs: ScanInputs,
}

/// Inputs plus what was last written to the controller
#[derive(Debug, Clone, Default)]
pub struct ScanPolicy {
    pub(crate) inputs: ScanInputs,
    applied: Option<ScanDecision>,
    written_params: Option<ScanParams>,
    force: bool,
}

impl ScanPolicy {
    /// Nothing applied yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite every setting on the next update
    pub fn request_retry(&mut self) {
        self.force = true;
    }

    /// Last applied decision
    #[must_use]
    pub fn applied(&self) -> Option<ScanDecision> {
        self.applied
    }

    /// Commands that bring the controller to `decision`
    ///
    /// Empty when the decision equals the last applied one and no forced write is due.
    pub fn apply(
        &mut self,
        decision: ScanDecision,
        params: ScanParams,
        force: bool,
    ) -> Vec<ControllerCommand, 7> {
        let mut commands = Vec::new();
        let force = force || self.force;
        if !force && self.applied == Some(decision) {
            return commands;
        }

        // unknown previous state counts as scanning
        let was_scanning = self.applied.is_none_or(|applied| applied.scanning());

        if force || self.applied.map(|a| a.scope) != Some(decision.scope) {
            commands
                .push(ControllerCommand::WriteCurrentIac {
                    lap: decision.scope.lap(),
                })
                .ok();
        }

        if decision.scanning() && (force || self.written_params != Some(params)) {
            if was_scanning {
                commands
                    .push(ControllerCommand::WriteScanEnable {
                        inquiry: false,
                        page: false,
                    })
                    .ok();
            }
            for command in [
                ControllerCommand::WriteInquiryScanActivity {
                    interval: params.inquiry_interval,
                    window: params.inquiry_window,
                },
                ControllerCommand::WriteInquiryScanType(params.inquiry_type),
                ControllerCommand::WritePageScanActivity {
                    interval: params.page_interval,
                    window: params.page_window,
                },
                ControllerCommand::WritePageScanType(params.page_type),
            ] {
                commands.push(command).ok();
            }
            self.written_params = Some(params);
        }

        commands
            .push(ControllerCommand::WriteScanEnable {
                inquiry: decision.discoverable,
                page: decision.connectable,
            })
            .ok();

        self.applied = Some(decision);
        self.force = false;
        commands
    }
}

impl Service {
    pub(crate) fn scan_context(&self) -> ScanContext {
        let phones = || self.rdm.iter().filter(|(_, r)| r.is_phone() && r.is_connected());
        ScanContext {
            connected_phones: self.rdm.connected_count(DeviceKind::Phone),
            connected_devices: self.rdm.connected_count(DeviceKind::All),
            local_role: self.rdm.local_role(),
            media_active: phones().any(|(_, r)| r.a2dp.priority.stream_open),
            sco_active: phones().any(|(_, r)| r.hfp.sco == ScoState::Hfp),
        }
    }

    /// Evaluate the policy and write the result if it changed
    pub(crate) fn update_scan(&mut self, force: bool) {
        self.timers.cancel(TimerId::global(TimerKind::ScanUpdate));
        let decision = decide(&self.scan.inputs, &self.scan_context(), &self.config);
        let params = self.config.scan_params.get(decision.scan_mode);
        let commands = self.scan.apply(decision, params, force);
        if commands.is_empty() {
            return;
        }
        defmt::info!(
            "[SCAN] discoverable {} connectable {} mode {} scope {}",
            decision.discoverable,
            decision.connectable,
            decision.scan_mode,
            decision.scope
        );
        for command in commands {
            self.command(command);
        }
        self.notify(crate::Notification::ScanChanged {
            discoverable: decision.discoverable,
            connectable: decision.connectable,
        });
    }

    /// Coalesce re-evaluation into one update after the debounce window
    pub(crate) fn schedule_scan_update(&mut self, now: Millis) -> Result<(), ServiceError> {
        self.timers
            .start(TimerId::global(TimerKind::ScanUpdate), now, SCAN_DEBOUNCE_MS)
    }

    pub(crate) fn scan_snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            applied: self.scan.applied(),
            inputs: self.scan.inputs,
        }
    }
}

/// Message handler for [`MessageTag::Scan`](crate::message::MessageTag::Scan)
pub(crate) fn handle_scan(service: &mut Service, message: Message, now: Millis) -> Result<(), ServiceError> {
    match message {
        Message::Scan(input) => {
            if service.scan.inputs.apply(input) {
                defmt::debug!("[SCAN] Input {}", input);
                service.schedule_scan_update(now)?;
            }
            Ok(())
        }
        Message::ScanRefresh { force } => {
            service.update_scan(force);
            Ok(())
        }
        _ => Err(ServiceError::InvalidArgument),
    }
}

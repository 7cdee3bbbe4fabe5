//! Active-device selection
//!
//! Every query here is a pure function of the record set: rules are evaluated top-down
//! and the first match wins. Ties inside a rule resolve to pool order.

use super::{ConnectionRecord, DeviceManager, Profile, RecordHandle};
use crate::hfp::ActiveTier;

type A2dpRule = fn(&DeviceManager) -> Option<RecordHandle>;

const A2DP_RULES: [A2dpRule; 3] = [
    // an explicit active flag wins even over higher priority bits elsewhere
    |rdm| {
        rdm.iter()
            .find(|(_, r)| r.a2dp.active && a2dp_phone(r))
            .map(|(h, _)| h)
    },
    |rdm| {
        let mut best: Option<(RecordHandle, u8)> = None;
        for (handle, record) in rdm.iter().filter(|(_, r)| a2dp_phone(r)) {
            let bits = record.a2dp.priority.bits();
            if bits > 0 && best.is_none_or(|(_, top)| bits > top) {
                best = Some((handle, bits));
            }
        }
        best.map(|(h, _)| h)
    },
    |rdm| rdm.iter().find(|(_, r)| a2dp_phone(r)).map(|(h, _)| h),
];

type HfpTier = fn(&ConnectionRecord) -> bool;

const HFP_TIERS: [HfpTier; 6] = [
    |r| r.profiles.is_connected(Profile::Hfp) && r.hfp.tier == ActiveTier::Actived,
    |r| !r.profiles.is_connected(Profile::Hfp) && r.hfp.tier == ActiveTier::Actived,
    |r| r.profiles.is_connected(Profile::Hfp) && r.hfp.tier == ActiveTier::Pending,
    |r| !r.profiles.is_connected(Profile::Hfp) && r.hfp.tier == ActiveTier::Pending,
    |r| r.profiles.is_connected(Profile::Hfp),
    |_| true,
];

fn a2dp_phone(record: &ConnectionRecord) -> bool {
    record.is_phone() && record.profiles.is_connected(Profile::A2dp)
}

impl DeviceManager {
    /// A2DP active device
    #[must_use]
    pub fn a2dp_active(&self) -> Option<RecordHandle> {
        A2DP_RULES.iter().find_map(|rule| rule(self))
    }

    /// First A2DP-connected phone other than the active one
    #[must_use]
    pub fn a2dp_second(&self) -> Option<RecordHandle> {
        let active = self.a2dp_active()?;
        self.iter()
            .find(|&(h, r)| h != active && a2dp_phone(r))
            .map(|(h, _)| h)
    }

    /// HFP active device
    #[must_use]
    pub fn hfp_active(&self) -> Option<RecordHandle> {
        HFP_TIERS.iter().find_map(|tier| {
            self.iter()
                .find(|(_, r)| r.is_phone() && r.is_connected() && tier(r))
                .map(|(h, _)| h)
        })
    }

    /// First connected phone other than the HFP active one
    #[must_use]
    pub fn hfp_second(&self) -> Option<RecordHandle> {
        let active = self.hfp_active()?;
        self.iter()
            .find(|&(h, r)| h != active && r.is_phone() && r.is_connected())
            .map(|(h, _)| h)
    }

    /// The phone the user is interacting with: the HFP active phone when it holds the
    /// active tier, otherwise the A2DP active phone
    #[must_use]
    pub fn active_phone(&self) -> Option<RecordHandle> {
        self.hfp_active()
            .filter(|&h| self.get(h).is_some_and(|r| r.hfp.tier == ActiveTier::Actived))
            .or_else(|| self.a2dp_active())
            .or_else(|| self.hfp_active())
    }

    /// First connected phone that is not the active phone
    #[must_use]
    pub fn nonactive_phone(&self) -> Option<RecordHandle> {
        let active = self.active_phone();
        self.iter()
            .find(|&(h, r)| Some(h) != active && r.is_phone() && r.is_connected())
            .map(|(h, _)| h)
    }
}

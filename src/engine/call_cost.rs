// src/engine/call_cost.rs
//! Rated cost returned by the rating engine: timespans, compressed
//! increments and the post action trigger ids attached to them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::decimal::Dec;
use crate::engine::call_descriptor::CallDescriptor;
use crate::utils::consts::ROUNDING_DECIMALS;
use crate::utils::time::{duration_ns, duration_secs};

/// Account ids mapped to the post action trigger ids to run on them.
pub type TriggerIds = HashMap<String, Vec<String>>;

/// Balance that paid for an increment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebitInfo {
    #[serde(rename = "Unit", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Value>,

    #[serde(rename = "Monetary", default, skip_serializing_if = "Option::is_none")]
    pub monetary: Option<Value>,

    #[serde(rename = "AccountID", default)]
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    #[serde(rename = "Duration", with = "duration_ns")]
    pub duration: Duration,

    #[serde(rename = "Cost", default)]
    pub cost: Dec,

    #[serde(rename = "BalanceInfo", default, skip_serializing_if = "Option::is_none")]
    pub balance_info: Option<DebitInfo>,

    #[serde(rename = "CompressFactor", default)]
    pub compress_factor: i64,

    /// Keyed by the 1-based position inside the compressed run.
    #[serde(rename = "PostATIDs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub post_at_ids: BTreeMap<String, Vec<String>>,
}

impl Increment {
    /// Same unit increment, compress factor ignored.
    pub fn same_unit(&self, other: &Increment) -> bool {
        self.duration == other.duration
            && self.cost == other.cost
            && self.balance_info == other.balance_info
            && self.post_at_ids == other.post_at_ids
    }

    pub fn total_cost(&self) -> Dec {
        self.cost * Dec::from_i64(self.compress_factor)
    }

    fn account_id(&self) -> String {
        self.balance_info
            .as_ref()
            .map(|bi| bi.account_id.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Increments {
    #[serde(rename = "CompIncrement", default, skip_serializing_if = "Option::is_none")]
    pub comp_increment: Option<Increment>,

    #[serde(rename = "MaxCostFreeIndex", default)]
    pub max_cost_free_index: i64,
}

impl Increments {
    pub fn len(&self) -> i64 {
        self.comp_increment
            .as_ref()
            .map(|i| i.compress_factor)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_cost(&self) -> Dec {
        match &self.comp_increment {
            Some(inc) => {
                let factor = if self.max_cost_free_index != 0 {
                    self.max_cost_free_index
                } else {
                    inc.compress_factor
                };
                inc.cost * Dec::from_i64(factor)
            }
            None => Dec::ZERO,
        }
    }
}

/// A rated slice of the call with a single rate interval attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSpan {
    #[serde(rename = "TimeStart")]
    pub time_start: DateTime<Utc>,

    #[serde(rename = "TimeEnd")]
    pub time_end: DateTime<Utc>,

    #[serde(rename = "Cost", default)]
    pub cost: Dec,

    /// Opaque rating data; only the connect fee is read back.
    #[serde(rename = "RateInterval", default, skip_serializing_if = "Option::is_none")]
    pub rate_interval: Option<Value>,

    #[serde(rename = "DurationIndex", with = "duration_ns", default = "zero_duration")]
    pub duration_index: Duration,

    #[serde(rename = "Increments", default, skip_serializing_if = "Option::is_none")]
    pub increments: Option<Increments>,

    #[serde(rename = "MatchedSubject", default)]
    pub matched_subject: String,

    #[serde(rename = "MatchedPrefix", default)]
    pub matched_prefix: String,

    #[serde(rename = "MatchedDestID", default)]
    pub matched_dest_id: String,

    #[serde(rename = "RatingPlanID", default)]
    pub rating_plan_id: String,

    #[serde(rename = "CompressFactor", default)]
    pub compress_factor: i64,
}

fn zero_duration() -> Duration {
    Duration::zero()
}

impl TimeSpan {
    pub fn new(time_start: DateTime<Utc>, time_end: DateTime<Utc>) -> Self {
        Self {
            time_start,
            time_end,
            cost: Dec::ZERO,
            rate_interval: None,
            duration_index: time_end - time_start,
            increments: None,
            matched_subject: String::new(),
            matched_prefix: String::new(),
            matched_dest_id: String::new(),
            rating_plan_id: String::new(),
            compress_factor: 1,
        }
    }

    /// Builds a span paid by `count` increments of `step` each costing `unit_cost`.
    pub fn with_increments(
        time_start: DateTime<Utc>,
        step: Duration,
        count: i64,
        unit_cost: Dec,
    ) -> Self {
        let mut ts = TimeSpan::new(time_start, time_start + step * count as i32);
        ts.increments = Some(Increments {
            comp_increment: Some(Increment {
                duration: step,
                cost: unit_cost,
                balance_info: Some(DebitInfo::default()),
                compress_factor: count,
                post_at_ids: BTreeMap::new(),
            }),
            max_cost_free_index: 0,
        });
        ts.cost = ts.calculate_cost();
        ts
    }

    pub fn duration(&self) -> Duration {
        self.time_end - self.time_start
    }

    pub fn compress_factor(&self) -> i64 {
        self.compress_factor.max(1)
    }

    pub fn unit_duration(&self) -> Duration {
        let cf = self.compress_factor();
        Duration::nanoseconds(self.duration().num_nanoseconds().unwrap_or(i64::MAX) / cf)
    }

    pub fn unit_cost(&self) -> Dec {
        self.cost
            .quo(&Dec::from_i64(self.compress_factor()))
            .unwrap_or(Dec::ZERO)
    }

    pub(crate) fn comp_increment(&self) -> Option<&Increment> {
        self.increments.as_ref().and_then(|i| i.comp_increment.as_ref())
    }

    /// Cost from the increments; spans without increments keep their own cost.
    pub fn calculate_cost(&self) -> Dec {
        match &self.increments {
            Some(incs) if !incs.is_empty() => {
                incs.total_cost() * Dec::from_i64(self.compress_factor())
            }
            _ => self.cost,
        }
    }

    pub fn time_start_for_increment(&self, index: i64) -> DateTime<Utc> {
        let step = self.comp_increment().map(|i| i.duration).unwrap_or_else(Duration::zero);
        self.time_start + Duration::nanoseconds(step.num_nanoseconds().unwrap_or(0) * index)
    }

    /// Splits before increment `index` (1-based); this span keeps the head.
    pub fn split_by_increment(&mut self, index: i64) -> Option<TimeSpan> {
        let index = index - 1;
        let total = self.increments.as_ref().map(|i| i.len()).unwrap_or(0);
        if index <= 0 || index >= total {
            return None;
        }
        let split_at = self.time_start_for_increment(index);
        let mut tail = self.clone();
        tail.time_start = split_at;
        if let Some(inc) = tail.increments.as_mut().and_then(|i| i.comp_increment.as_mut()) {
            inc.compress_factor = total - index;
        }
        self.time_end = split_at;
        if let Some(inc) = self.increments.as_mut().and_then(|i| i.comp_increment.as_mut()) {
            inc.compress_factor = index;
        }
        let idx = self.duration_index - tail.duration();
        self.duration_index = if idx < Duration::zero() { Duration::zero() } else { idx };
        tail.cost = tail.calculate_cost();
        Some(tail)
    }

    fn same_unit(&self, other: &TimeSpan) -> bool {
        let incs_equal = match (self.comp_increment(), other.comp_increment()) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_unit(b) && a.compress_factor == b.compress_factor,
            _ => false,
        };
        incs_equal
            && self.rate_interval == other.rate_interval
            && self.unit_cost() == other.unit_cost()
            && self.unit_duration() == other.unit_duration()
            && self.matched_subject == other.matched_subject
            && self.matched_prefix == other.matched_prefix
            && self.matched_dest_id == other.matched_dest_id
            && self.rating_plan_id == other.rating_plan_id
    }
}

/// Folds consecutive identical spans into one with a compress factor.
pub fn compress_timespans(spans: &mut Vec<TimeSpan>) {
    let mut out: Vec<TimeSpan> = Vec::with_capacity(spans.len());
    for mut ts in spans.drain(..) {
        match out.last_mut() {
            Some(last) if last.same_unit(&ts) => {
                last.compress_factor = last.compress_factor() + 1;
                last.cost += ts.cost;
                last.time_end = ts.time_end;
                last.duration_index = ts.duration_index;
            }
            _ => {
                ts.compress_factor = ts.compress_factor();
                out.push(ts);
            }
        }
    }
    *spans = out;
}

/// Expands compressed spans back into unit spans.
pub fn decompress_timespans(spans: &mut Vec<TimeSpan>) {
    let mut out: Vec<TimeSpan> = Vec::with_capacity(spans.len());
    for mut cts in spans.drain(..) {
        let cf = cts.compress_factor();
        if cf > 1 {
            let unit = cts.unit_duration();
            let unit_cost = cts.unit_cost();
            let mut i = cf;
            while i > 1 {
                let mut uts = cts.clone();
                uts.cost = unit_cost;
                uts.time_end = cts.time_start + unit;
                uts.duration_index = cts.duration_index - unit * (i - 1) as i32;
                uts.compress_factor = 1;
                cts.time_start = uts.time_end;
                out.push(uts);
                i -= 1;
            }
            cts.cost = unit_cost;
        }
        cts.compress_factor = 1;
        out.push(cts);
    }
    *spans = out;
}

/// Reply of `Responder.MaxDebit` / `Responder.Debit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallCost {
    #[serde(rename = "Direction", default)]
    pub direction: String,

    #[serde(rename = "Category", default)]
    pub category: String,

    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "Subject", default)]
    pub subject: String,

    #[serde(rename = "Account", default)]
    pub account: String,

    #[serde(rename = "Destination", default)]
    pub destination: String,

    #[serde(rename = "TOR", default)]
    pub tor: String,

    #[serde(rename = "Cost", default)]
    pub cost: Dec,

    #[serde(rename = "Timespans", default)]
    pub timespans: Vec<TimeSpan>,

    #[serde(rename = "RatedUsage", default)]
    pub rated_usage: f64,
}

impl CallCost {
    pub fn is_empty(&self) -> bool {
        self.timespans.is_empty()
    }

    /// Appends the other cost's spans and adds its cost.
    pub fn merge(&mut self, other: CallCost) {
        self.timespans.extend(other.timespans);
        self.cost += other.cost;
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.timespans.first().map(|ts| ts.time_start)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.timespans.last().map(|ts| ts.time_end)
    }

    pub fn duration(&self) -> Duration {
        self.timespans
            .iter()
            .fold(Duration::zero(), |acc, ts| acc + ts.duration())
    }

    pub fn update_rated_usage(&mut self) -> Duration {
        let total = self.duration();
        self.rated_usage = duration_secs(total);
        total
    }

    /// Connect fee of the first rate interval, zero when unknown.
    pub fn connect_fee(&self) -> Dec {
        self.timespans
            .first()
            .and_then(|ts| ts.rate_interval.as_ref())
            .and_then(|ri| ri.get("Rating"))
            .and_then(|r| r.get("ConnectFee"))
            .and_then(|fee| serde_json::from_value::<Dec>(fee.clone()).ok())
            .unwrap_or(Dec::ZERO)
    }

    /// Recomputes the cost of a merged cost, connect fee included.
    pub fn update_cost(&mut self) {
        let mut cost = self.connect_fee();
        for ts in self.timespans.iter_mut() {
            ts.cost = ts.calculate_cost();
            cost += ts.cost;
        }
        self.cost = cost.round(ROUNDING_DECIMALS);
    }

    pub fn compress(&mut self) {
        compress_timespans(&mut self.timespans);
    }

    pub fn decompress(&mut self) {
        decompress_timespans(&mut self.timespans);
    }

    /// Cuts `truncate` off the tail and returns the increments released.
    pub fn truncate_timespans_at_duration(&mut self, mut truncate: Duration) -> Vec<Increment> {
        self.decompress();
        let mut refunded = Vec::new();
        while let Some(ts) = self.timespans.last_mut() {
            let ts_duration = ts.duration();
            let comp = match ts.comp_increment() {
                Some(inc) => inc.clone(),
                None => {
                    if truncate >= ts_duration && ts_duration > Duration::zero() {
                        truncate = truncate - ts_duration;
                        self.timespans.pop();
                        continue;
                    }
                    break;
                }
            };
            let mut released = comp.clone();
            released.compress_factor = 0;
            if truncate <= ts_duration {
                while released.compress_factor < comp.compress_factor
                    && comp.duration > Duration::zero()
                    && comp.duration <= truncate
                {
                    released.compress_factor += 1;
                    truncate = truncate - comp.duration;
                }
                let count = released.compress_factor;
                if count == comp.compress_factor {
                    self.timespans.pop();
                } else {
                    ts.split_by_increment(comp.compress_factor - count + 1);
                    ts.cost = ts.calculate_cost();
                }
                if count > 0 {
                    refunded.push(released);
                }
                break;
            }
            released.compress_factor = comp.compress_factor;
            refunded.push(released);
            self.timespans.pop();
            truncate = truncate - ts_duration;
        }
        refunded
    }

    /// Partitions trigger ids into those reached before `split` and the rest.
    pub fn post_action_triggers(&mut self, split: Duration) -> (TriggerIds, TriggerIds) {
        let mut exe = TriggerIds::new();
        let mut unexe = TriggerIds::new();
        self.decompress();
        let mut so_far = Duration::zero();
        for ts in &self.timespans {
            let Some(inc) = ts.comp_increment() else {
                continue;
            };
            for index in 1..=inc.compress_factor {
                if let Some(ids) = inc.post_at_ids.get(&index.to_string()) {
                    let target = if so_far < split { &mut exe } else { &mut unexe };
                    target
                        .entry(inc.account_id())
                        .or_default()
                        .extend(ids.iter().cloned());
                }
                so_far = so_far + inc.duration;
            }
        }
        (exe, unexe)
    }

    /// Seeds a descriptor with this cost's rating keys.
    pub fn create_call_descriptor(&self) -> CallDescriptor {
        CallDescriptor {
            direction: self.direction.clone(),
            category: self.category.clone(),
            tenant: self.tenant.clone(),
            subject: self.subject.clone(),
            account: self.account.clone(),
            destination: self.destination.clone(),
            tor: self.tor.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 11, 9, 14, 22, 2).unwrap()
    }

    fn cc_with(spans: Vec<TimeSpan>) -> CallCost {
        let mut cc = CallCost {
            tenant: "cgrates.org".into(),
            account: "1001".into(),
            timespans: spans,
            ..Default::default()
        };
        cc.update_cost();
        cc
    }

    #[test]
    fn test_duration_and_times() {
        let cc = cc_with(vec![TimeSpan::with_increments(t0(), Duration::seconds(10), 6, Dec::new(1, 1))]);
        assert_eq!(cc.duration(), Duration::seconds(60));
        assert_eq!(cc.start_time(), Some(t0()));
        assert_eq!(cc.end_time(), Some(t0() + Duration::seconds(60)));
        assert_eq!(cc.cost.inner(), dec!(0.6));
    }

    #[test]
    fn test_merge_appends_spans_and_cost() {
        let mut a = cc_with(vec![TimeSpan::with_increments(t0(), Duration::seconds(10), 6, Dec::new(1, 1))]);
        let b = cc_with(vec![TimeSpan::with_increments(
            t0() + Duration::seconds(60),
            Duration::seconds(10),
            6,
            Dec::new(1, 1),
        )]);
        a.merge(b);
        assert_eq!(a.timespans.len(), 2);
        assert_eq!(a.duration(), Duration::seconds(120));
        assert_eq!(a.cost.inner(), dec!(1.2));
    }

    #[test]
    fn test_truncate_inside_last_span() {
        let mut cc = cc_with(vec![TimeSpan::with_increments(t0(), Duration::seconds(10), 6, Dec::new(1, 1))]);
        let refunded = cc.truncate_timespans_at_duration(Duration::seconds(25));
        assert_eq!(refunded.len(), 1);
        assert_eq!(refunded[0].compress_factor, 2);
        assert_eq!(cc.duration(), Duration::seconds(40));
        cc.update_cost();
        assert_eq!(cc.cost.inner(), dec!(0.4));
    }

    #[test]
    fn test_truncate_across_spans() {
        let mut cc = cc_with(vec![
            TimeSpan::with_increments(t0(), Duration::seconds(10), 6, Dec::new(1, 1)),
            TimeSpan::with_increments(t0() + Duration::seconds(60), Duration::seconds(1), 30, Dec::new(1, 2)),
        ]);
        let refunded = cc.truncate_timespans_at_duration(Duration::seconds(50));
        assert_eq!(refunded.len(), 2);
        assert_eq!(refunded[0].compress_factor, 30);
        assert_eq!(refunded[1].compress_factor, 2);
        assert_eq!(cc.duration(), Duration::seconds(40));
    }

    #[test]
    fn test_truncate_whole_span() {
        let mut cc = cc_with(vec![TimeSpan::with_increments(t0(), Duration::seconds(10), 6, Dec::new(1, 1))]);
        let refunded = cc.truncate_timespans_at_duration(Duration::seconds(60));
        assert_eq!(refunded[0].compress_factor, 6);
        assert!(cc.is_empty());
    }

    #[test]
    fn test_post_action_triggers_split() {
        let mut ts = TimeSpan::with_increments(t0(), Duration::seconds(10), 6, Dec::new(1, 1));
        if let Some(inc) = ts.increments.as_mut().and_then(|i| i.comp_increment.as_mut()) {
            inc.balance_info = Some(DebitInfo {
                account_id: "cgrates.org:1001".into(),
                ..Default::default()
            });
            inc.post_at_ids.insert("2".into(), vec!["AT_LOW".into()]);
            inc.post_at_ids.insert("5".into(), vec!["AT_EMPTY".into()]);
        }
        let mut cc = cc_with(vec![ts]);
        let (exe, unexe) = cc.post_action_triggers(Duration::seconds(30));
        assert_eq!(exe["cgrates.org:1001"], vec!["AT_LOW".to_string()]);
        assert_eq!(unexe["cgrates.org:1001"], vec!["AT_EMPTY".to_string()]);
    }

    #[test]
    fn test_compress_and_decompress() {
        let mut spans = vec![
            TimeSpan::with_increments(t0(), Duration::seconds(1), 10, Dec::new(1, 2)),
            TimeSpan::with_increments(t0() + Duration::seconds(10), Duration::seconds(1), 10, Dec::new(1, 2)),
        ];
        compress_timespans(&mut spans);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].compress_factor, 2);
        assert_eq!(spans[0].duration(), Duration::seconds(20));
        decompress_timespans(&mut spans);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].time_end, spans[1].time_start);
        assert_eq!(spans[1].cost.inner(), dec!(0.1));
    }

    #[test]
    fn test_connect_fee_added_on_update() {
        let mut ts = TimeSpan::with_increments(t0(), Duration::seconds(10), 6, Dec::new(1, 1));
        ts.rate_interval = Some(serde_json::json!({"Rating": {"ConnectFee": "0.4"}}));
        let cc = cc_with(vec![ts]);
        assert_eq!(cc.cost.inner(), dec!(1.0));
    }

    #[test]
    fn test_deserialize_wire_cost() {
        let raw = r#"{
            "Direction": "*out", "Tenant": "cgrates.org", "Account": "1001", "TOR": "*voice",
            "Cost": 0.6,
            "Timespans": [{
                "TimeStart": "2015-11-09T14:22:02Z", "TimeEnd": "2015-11-09T14:23:02Z",
                "Cost": 0.6, "DurationIndex": 60000000000,
                "Increments": {"CompIncrement": {"Duration": 10000000000, "Cost": 0.1, "CompressFactor": 6}}
            }]
        }"#;
        let cc: CallCost = serde_json::from_str(raw).unwrap();
        assert_eq!(cc.duration(), Duration::seconds(60));
        assert_eq!(cc.timespans[0].increments.as_ref().unwrap().len(), 6);
    }
}

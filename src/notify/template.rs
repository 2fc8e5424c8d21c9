// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notification kinds, templates and rendering.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::state::Transition;
use crate::types::{HumanDuration, PowerState, VoltageState};

const MISSING: &str = "н/д";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LIFT_WARNING: &str = "🚫 Під час падіння напруги не користуйтеся ліфтом.";

// ============================================================================
// NotificationKind
// ============================================================================

/// Template key for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Mains restored.
    PowerOn,
    /// Mains lost.
    PowerOff,
    /// Voltage in a warning band.
    VoltageWarning,
    /// Voltage in a critical band.
    VoltageCritical,
    /// Voltage back to normal after an abnormal band.
    VoltageNormal,
    /// A planned outage is about to start.
    ScheduleWarning,
}

impl NotificationKind {
    /// All kinds.
    pub const ALL: [Self; 6] = [
        Self::PowerOn,
        Self::PowerOff,
        Self::VoltageWarning,
        Self::VoltageCritical,
        Self::VoltageNormal,
        Self::ScheduleWarning,
    ];

    /// Returns the template id.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PowerOn => "power_on",
            Self::PowerOff => "power_off",
            Self::VoltageWarning => "voltage_warning",
            Self::VoltageCritical => "voltage_critical",
            Self::VoltageNormal => "voltage_normal",
            Self::ScheduleWarning => "schedule_warning",
        }
    }

    /// Maps a transition to the message it should produce, if any.
    ///
    /// `ZERO`, `UNKNOWN` and `OFF` voltage bands are never announced (the
    /// power message covers `OFF`), and `NORMAL` is only announced when
    /// leaving an abnormal band.
    #[must_use]
    pub fn for_transition(transition: &Transition) -> Option<Self> {
        match transition {
            Transition::Power { to, .. } => match to {
                PowerState::On => Some(Self::PowerOn),
                PowerState::Off => Some(Self::PowerOff),
                PowerState::Unknown => None,
            },
            Transition::Voltage { from, to, .. } => match to {
                VoltageState::Low | VoltageState::High => Some(Self::VoltageWarning),
                VoltageState::CritLow | VoltageState::CritHigh => Some(Self::VoltageCritical),
                VoltageState::Normal if from.is_abnormal() => Some(Self::VoltageNormal),
                _ => None,
            },
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseError::InvalidValue {
                field: "template_id".to_string(),
                message: s.to_string(),
            })
    }
}

// ============================================================================
// Template
// ============================================================================

/// Title and body with `{placeholder}` slots.
///
/// Supported placeholders: `{time}`, `{duration}`, `{voltage}`, `{state}`,
/// `{start}`, `{end}`, `{lead}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// First line of the message.
    pub title: String,
    /// Message body.
    pub body: String,
    /// Disabled templates produce no message.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Template {
    /// Creates an enabled template.
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            enabled: true,
        }
    }

    /// Built-in text for `kind`.
    #[must_use]
    pub fn default_for(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::PowerOn => Self::new(
                "✅ Світло з'явилося!",
                "🕒 {time}\n⚡ Напруга: {voltage}V\n⏱ Не було: {duration}",
            ),
            NotificationKind::PowerOff => {
                Self::new("❌ Світло зникло!", "🕒 {time}\n⏱ Було увімкнено: {duration}")
            }
            NotificationKind::VoltageWarning => Self::new(
                "⚠️ Напруга поза нормою",
                "🕒 {time}\n⚡ Напруга: {voltage}V ({state})",
            ),
            NotificationKind::VoltageCritical => Self::new(
                "🆘 Критична напруга!",
                "🕒 {time}\n⚡ Напруга: {voltage}V ({state})",
            ),
            NotificationKind::VoltageNormal => {
                Self::new("✅ Напруга нормалізувалась", "🕒 {time}\n⚡ Напруга: {voltage}V")
            }
            NotificationKind::ScheduleWarning => Self::new(
                "⚠️ Планове відключення",
                "📅 Через {lead} хв планове відключення\n⏰ {start} - {end}",
            ),
        }
    }
}

// ============================================================================
// NotifyContext
// ============================================================================

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotifyContext {
    /// When the change was detected.
    pub time: Option<NaiveDateTime>,
    /// Time spent in the previous state.
    pub duration: Option<HumanDuration>,
    /// Voltage reading.
    pub voltage: Option<f64>,
    /// Voltage band.
    pub voltage_state: Option<VoltageState>,
    /// Planned outage start.
    pub start: Option<NaiveTime>,
    /// Planned outage end.
    pub end: Option<NaiveTime>,
    /// Minutes until the planned outage.
    pub lead_minutes: Option<u64>,
}

impl NotifyContext {
    /// Creates a context stamped with `time`.
    #[must_use]
    pub fn at(time: NaiveDateTime) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration(mut self, duration: HumanDuration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sets the voltage reading and band.
    #[must_use]
    pub fn with_voltage(mut self, voltage: Option<f64>, state: VoltageState) -> Self {
        self.voltage = voltage;
        self.voltage_state = Some(state);
        self
    }

    /// Sets the planned outage window.
    #[must_use]
    pub fn with_window(mut self, start: NaiveTime, end: NaiveTime, lead_minutes: u64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self.lead_minutes = Some(lead_minutes);
        self
    }

    fn value(&self, placeholder: &str) -> Option<String> {
        match placeholder {
            "time" => self.time.map(|t| t.format(TIME_FORMAT).to_string()),
            "duration" => self.duration.map(|d| d.to_string()),
            "voltage" => self.voltage.map(|v| format!("{v:.1}")),
            "state" => self.voltage_state.map(|s| s.label().to_string()),
            "start" => self.start.map(|t| t.format("%H:%M").to_string()),
            "end" => self.end.map(|t| t.format("%H:%M").to_string()),
            "lead" => self.lead_minutes.map(|m| m.to_string()),
            _ => None,
        }
    }
}

/// Extra guidance appended to voltage warnings.
#[must_use]
pub fn voltage_advice(state: VoltageState) -> Option<String> {
    match state {
        VoltageState::CritLow | VoltageState::Low => Some(format!(
            "⚠️ Рекомендація: бажано вимкнути чутливу техніку (ПК/ноутбук без UPS, NAS, ТВ, \
             зарядні, мережеве обладнання без стабілізатора).\n{LIFT_WARNING}"
        )),
        VoltageState::CritHigh | VoltageState::High => Some(
            "⚠️ Рекомендація: бажано вимкнути чутливу техніку до стабілізації напруги.".to_string(),
        ),
        _ => None,
    }
}

// ============================================================================
// TemplateSet
// ============================================================================

/// Templates for every [`NotificationKind`], falling back to built-ins.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use mainswatch::notify::{NotificationKind, NotifyContext, TemplateSet};
/// use mainswatch::types::{HumanDuration, VoltageState};
///
/// let at = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap().and_hms_opt(7, 30, 0).unwrap();
/// let ctx = NotifyContext::at(at)
///     .with_voltage(Some(229.6), VoltageState::Normal)
///     .with_duration(HumanDuration::from_secs(5400));
///
/// let text = TemplateSet::default().render(NotificationKind::PowerOn, &ctx).unwrap();
/// assert!(text.starts_with("✅ Світло з'явилося!"));
/// assert!(text.contains("229.6V"));
/// assert!(text.contains("1 год 30 хв"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateSet {
    overrides: HashMap<NotificationKind, Template>,
}

impl TemplateSet {
    /// Replaces the template for `kind`.
    pub fn set(&mut self, kind: NotificationKind, template: Template) {
        self.overrides.insert(kind, template);
    }

    /// Returns the effective template for `kind`.
    #[must_use]
    pub fn get(&self, kind: NotificationKind) -> Template {
        self.overrides
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Template::default_for(kind))
    }

    /// Renders the message for `kind`, or `None` if the template is disabled.
    #[must_use]
    pub fn render(&self, kind: NotificationKind, ctx: &NotifyContext) -> Option<String> {
        let template = self.get(kind);
        if !template.enabled {
            return None;
        }

        let mut text = substitute(&template.title, ctx);
        let body = substitute(&template.body, ctx);
        if !body.trim().is_empty() {
            text.push_str("\n\n");
            text.push_str(&body);
        }

        let advice = match kind {
            NotificationKind::VoltageWarning | NotificationKind::VoltageCritical => {
                ctx.voltage_state.and_then(voltage_advice)
            }
            _ => None,
        };
        if let Some(advice) = advice {
            text.push_str("\n\n");
            text.push_str(&advice);
        }
        Some(text)
    }
}

fn substitute(template: &str, ctx: &NotifyContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder(&after[..close]) => {
                let name = &after[..close];
                out.push_str(&ctx.value(name).unwrap_or_else(|| MISSING.to_string()));
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_placeholder(name: &str) -> bool {
    matches!(
        name,
        "time" | "duration" | "voltage" | "state" | "start" | "end" | "lead"
    )
}

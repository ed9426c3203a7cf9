//! Security detection for scanned networks.
//!
//! A scan record advertises its capabilities as a set of tokens (for example
//! `WPA2-PSK-CCMP`, `WEP`, `ESS`). [`classify`] reduces them to the single
//! [`SecurityKind`] used to build a join configuration.

use serde::Serialize;
use std::fmt;

/// Authentication/encryption scheme inferred for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SecurityKind {
    Open,
    PresharedKey,
    LegacyWep,
}

impl fmt::Display for SecurityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SecurityKind::Open => "Open",
            SecurityKind::PresharedKey => "PSK",
            SecurityKind::LegacyWep => "WEP",
        };
        f.write_str(label)
    }
}

/// Markers checked in priority order. The first one found in any token wins.
const PRIORITY: [(&str, SecurityKind); 2] = [
    ("WEP", SecurityKind::LegacyWep),
    ("PSK", SecurityKind::PresharedKey),
];

/// Classifies a set of capability tokens.
///
/// A marker matches when it occurs anywhere inside a token, so `WPA2-PSK-CCMP`
/// counts as PSK. `WEP` is checked before `PSK`; when neither occurs the
/// network is treated as open.
pub fn classify<I, S>(capability_tokens: I) -> SecurityKind
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let tokens: Vec<S> = capability_tokens.into_iter().collect();

    PRIORITY
        .iter()
        .find(|(marker, _)| tokens.iter().any(|t| t.as_ref().contains(marker)))
        .map(|(_, kind)| *kind)
        .unwrap_or(SecurityKind::Open)
}

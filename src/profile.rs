//! Join configuration building.
//!
//! Turns the caller's [`TargetNetwork`] and the detected [`SecurityKind`] into
//! the [`JoinConfiguration`] handed to the network layer. Nothing here touches
//! the network layer itself.

use std::fmt;

use crate::security::SecurityKind;

/// The network a join attempt is aimed at. Immutable for the attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetNetwork {
    pub name: String,
    pub credential: String,
}

impl TargetNetwork {
    pub fn new(name: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credential: credential.into(),
        }
    }

    /// True when `reported` names this network once quotes are stripped.
    pub fn matches(&self, reported: &str) -> bool {
        normalize_name(reported) == normalize_name(&self.name)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for TargetNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetNetwork")
            .field("name", &self.name)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Strips the double quotes some network layers wrap around names.
pub fn normalize_name(name: &str) -> String {
    name.replace('"', "")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyManagement {
    None,
    WpaPsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCipher {
    Wep40,
}

/// Fully specified profile submitted to the network layer.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinConfiguration {
    pub name: String,
    pub security: SecurityKind,
    pub key_management: KeyManagement,
    pub pre_shared_key: Option<String>,
    /// WEP key slots; only slot 0 is ever filled.
    pub wep_keys: [Option<String>; 4],
    pub wep_key_index: Option<u8>,
    pub group_cipher: Option<GroupCipher>,
}

impl JoinConfiguration {
    /// The credential this configuration applies, if any.
    pub fn credential(&self) -> Option<&str> {
        match self.security {
            SecurityKind::PresharedKey => self.pre_shared_key.as_deref(),
            SecurityKind::LegacyWep => self
                .wep_key_index
                .and_then(|i| self.wep_keys.get(usize::from(i)))
                .and_then(|k| k.as_deref()),
            SecurityKind::Open => None,
        }
    }
}

impl fmt::Debug for JoinConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinConfiguration")
            .field("name", &self.name)
            .field("security", &self.security)
            .field("key_management", &self.key_management)
            .field("has_credential", &self.credential().is_some())
            .field("wep_key_index", &self.wep_key_index)
            .field("group_cipher", &self.group_cipher)
            .finish()
    }
}

/// Builds the join configuration for `target` secured with `security`.
///
/// - `LegacyWep`: key slot 0 holds the credential, key index 0, no key
///   management, WEP40 group cipher.
/// - `PresharedKey`: the credential becomes the pre-shared key.
/// - `Open`: no key management and no credential.
pub fn build(target: &TargetNetwork, security: SecurityKind, credential: &str) -> JoinConfiguration {
    let mut config = JoinConfiguration {
        name: target.name.clone(),
        security,
        key_management: KeyManagement::None,
        pre_shared_key: None,
        wep_keys: Default::default(),
        wep_key_index: None,
        group_cipher: None,
    };

    match security {
        SecurityKind::LegacyWep => {
            config.wep_keys[0] = Some(credential.to_string());
            config.wep_key_index = Some(0);
            config.group_cipher = Some(GroupCipher::Wep40);
        }
        SecurityKind::PresharedKey => {
            config.key_management = KeyManagement::WpaPsk;
            config.pre_shared_key = Some(credential.to_string());
        }
        SecurityKind::Open => {}
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meeting_room() -> TargetNetwork {
        TargetNetwork::new("Meeting Room", "Avanti123")
    }

    #[test]
    fn test_build_psk() {
        let target = meeting_room();
        let config = build(&target, SecurityKind::PresharedKey, &target.credential);

        assert_eq!(config.name, "Meeting Room");
        assert_eq!(config.key_management, KeyManagement::WpaPsk);
        assert_eq!(config.pre_shared_key.as_deref(), Some("Avanti123"));
        assert_eq!(config.wep_key_index, None);
        assert_eq!(config.credential(), Some("Avanti123"));
    }

    #[test]
    fn test_build_wep() {
        let target = meeting_room();
        let config = build(&target, SecurityKind::LegacyWep, &target.credential);

        assert_eq!(config.wep_keys[0].as_deref(), Some("Avanti123"));
        assert!(config.wep_keys[1..].iter().all(Option::is_none));
        assert_eq!(config.wep_key_index, Some(0));
        assert_eq!(config.key_management, KeyManagement::None);
        assert_eq!(config.group_cipher, Some(GroupCipher::Wep40));
        assert_eq!(config.pre_shared_key, None);
    }

    #[test]
    fn test_build_open_ignores_credential() {
        let target = meeting_room();
        let config = build(&target, SecurityKind::Open, &target.credential);

        assert_eq!(config.key_management, KeyManagement::None);
        assert_eq!(config.credential(), None);
        assert_eq!(config.group_cipher, None);
    }

    #[test]
    fn test_debug_hides_credentials() {
        let target = meeting_room();
        let config = build(&target, SecurityKind::PresharedKey, &target.credential);

        assert!(!format!("{:?}", target).contains("Avanti123"));
        assert!(!format!("{:?}", config).contains("Avanti123"));
    }

    #[test]
    fn test_matches_strips_quotes() {
        let target = meeting_room();
        assert!(target.matches("\"Meeting Room\""));
        assert!(target.matches("Meeting Room"));
        assert!(!target.matches("meeting room"));
        assert!(!target.matches("Meeting Room 2"));
    }
}

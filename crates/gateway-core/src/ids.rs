//! Identifier newtypes shared by every gateway crate.
//!
//! # Design summary
//! - **Why**: the connection map, membership cache and push service all key
//!   their concurrent maps by the same few identifiers; sharing one newtype
//!   per identifier keeps hashing/equality/display behavior consistent and
//!   lets every crate clone a key for free instead of allocating a `String`.
//! - **What**: each newtype wraps `Arc<str>`, mirroring the `Arc<str>`
//!   Call-ID convention used for the session/roster keys this system is
//!   grounded on; `DeviceId` additionally validates UUID v4 shape at
//!   construction so no downstream component needs to re-check it.

use std::fmt;
use std::sync::Arc;

use crate::error::GatewayError;

macro_rules! arc_str_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Wraps an owned or borrowed string without further validation.
            pub fn new(value: impl Into<Arc<str>>) -> Self {
                Self(value.into())
            }

            /// Borrowed view of the identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Cheap clone of the backing `Arc<str>` for use as a map key.
            pub fn as_arc(&self) -> &Arc<str> {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(Arc::from(value))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Arc::from(value))
            }
        }
    };
}

arc_str_id!(UserId, "Opaque user identifier, as supplied by the auth service.");
arc_str_id!(GroupId, "Opaque group identifier used by the membership cache and event consumer.");
arc_str_id!(MsgId, "Client- or routing-service-assigned message identifier.");
arc_str_id!(ConversationId, "Opaque conversation identifier carried on read-receipt frames.");

/// A device identifier, validated as a case-insensitive UUID v4 at construction.
///
/// # Design summary
/// - **Why**: spec compliance requires every `ACTIVE` connection's device id
///   to match the UUID v4 shape (version nibble `4`, variant nibble in
///   `8|9|a|b`); values carrying a hardware identifier (IMEI, MAC) must be
///   rejected by virtue of failing that shape. Validating once here means no
///   other component can forget the check.
/// - **What**: stores the canonical lower-case form so the connection map
///   key and directory lookups are never split by casing differences.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Validates `raw` as a UUID v4 and returns the canonical lower-case form.
    ///
    /// Rejects anything that isn't exactly 36 characters in
    /// `8-4-4-4-12` hyphenated hex form with version nibble `4` and variant
    /// nibble in `8`, `9`, `a`, or `b`. This shape check is what excludes a
    /// 15-digit IMEI or a MAC-shaped string: neither can satisfy it.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        if !is_uuid_v4(raw) {
            return Err(GatewayError::InvalidDeviceId {
                raw: raw.to_owned(),
            });
        }
        Self::parse_valid(raw)
    }

    fn parse_valid(raw: &str) -> Result<Self, GatewayError> {
        Ok(Self(Arc::from(raw.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_arc(&self) -> &Arc<str> {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_uuid_v4(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            14 => {
                if *b != b'4' {
                    return false;
                }
            }
            19 => {
                if !matches!(b.to_ascii_lowercase(), b'8' | b'9' | b'a' | b'b') {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

/// Composite connection-map key: `"{user_id}_{device_id}"`.
///
/// Built through a single constructor so the delimiter and casing stay
/// consistent between Connection registration and Push service prefix
/// scans over the connection map (spec's directory/map race-window scan).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionKey(Arc<str>);

impl ConnectionKey {
    pub fn new(user_id: &UserId, device_id: &DeviceId) -> Self {
        Self(Arc::from(format!("{user_id}_{device_id}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix used to scan the connection map for every device of `user_id`.
    pub fn user_prefix(user_id: &UserId) -> String {
        format!("{user_id}_")
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_uuid_v4() {
        let id = DeviceId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(id.as_str(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn accepts_uppercase_uuid_v4_and_canonicalizes() {
        let id = DeviceId::parse("550E8400-E29B-41D4-A716-446655440000").unwrap();
        assert_eq!(id.as_str(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn rejects_imei_shaped_value() {
        assert!(DeviceId::parse("490154203237518").is_err());
    }

    #[test]
    fn rejects_mac_shaped_value() {
        assert!(DeviceId::parse("00:1A:2B:3C:4D:5E").is_err());
    }

    #[test]
    fn rejects_wrong_version_nibble() {
        // Valid UUID shape but version nibble is `1`, not `4`.
        assert!(DeviceId::parse("550e8400-e29b-11d4-a716-446655440000").is_err());
    }

    #[test]
    fn rejects_wrong_variant_nibble() {
        assert!(DeviceId::parse("550e8400-e29b-41d4-0716-446655440000").is_err());
    }

    #[test]
    fn connection_key_is_stable_and_prefixed() {
        let user = UserId::from("user_42");
        let device = DeviceId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = ConnectionKey::new(&user, &device);
        assert_eq!(
            key.as_str(),
            "user_42_550e8400-e29b-41d4-a716-446655440000"
        );
        assert!(key.as_str().starts_with(&ConnectionKey::user_prefix(&user)));
    }
}

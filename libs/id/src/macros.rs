//! Macros for defining opaque ID types.

/// Macro to define an opaque, scheduler-assigned ID.
///
/// The scheduler owns the format of these identifiers, so the wrapper only
/// guarantees that the value is non-empty and free of whitespace. It generates:
/// - `parse()` to validate a string
/// - `generate()` to mint a fresh ULID-backed value (used by fakes and tests)
/// - `Display`, `FromStr`, `AsRef<str>`
/// - `Serialize` and `Deserialize` as a plain string
///
/// # Example
///
/// ```ignore
/// define_id!(JobId, "job");
///
/// let id: JobId = "7f3c2b8e-0d6a-4f8e-9a51-2b7c9d0e1f23".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $kind:literal) => {
        /// An opaque identifier assigned by the scheduler.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable resource kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Mints a fresh, unique ID.
            #[must_use]
            pub fn generate() -> Self {
                Self($crate::Ulid::new().to_string().to_lowercase())
            }

            /// Parses an ID from a string.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty { kind: Self::KIND });
                }
                if s.chars().any(char::is_whitespace) {
                    return Err($crate::IdError::InvalidFormat {
                        kind: Self::KIND,
                        message: format!("'{s}' contains whitespace"),
                    });
                }
                Ok(Self(s.to_string()))
            }

            /// Returns the raw string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(self.as_str(), &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(self.as_str(), &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

/// Writes at most `f.width()` (or `default_len`) characters, eliding the rest
fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A raw bearer token, without any `Bearer ` prefix
///
/// The value is redacted from `Debug` and `Display` output unless the
/// alternate flag (`{:#}`) is given.
#[braid(
    serde,
    debug = "owned",
    display = "owned",
    ref_doc = "A borrowed reference to an [`AccessToken`]"
)]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// The key under which a token is persisted in a [`TokenStorage`][crate::storage::TokenStorage]
#[braid(serde, ref_doc = "A borrowed reference to a [`StorageKey`]")]
pub struct StorageKey;

impl StorageKey {
    const BASE: &'static str = "Authorization";

    /// Builds the storage key for an optional namespace
    ///
    /// The key is `<namespace>_Authorization` when a namespace is given,
    /// otherwise `Authorization`.
    pub fn namespaced(namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) => Self::new(format!("{}_{}", ns, Self::BASE)),
            None => Self::from_static(Self::BASE),
        }
    }
}

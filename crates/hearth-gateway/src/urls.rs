use std::fmt;

use url::Url;

use crate::error::{GatewayError, GatewayResult};

/// The three stores every ledger keeps behind its gateways.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// CAR envelopes, keyed by CAR CID.
    Data,
    /// The list of current meta records, keyed by branch.
    Meta,
    /// Pending remote writes.
    Wal,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Data => "data",
            StoreKind::Meta => "meta",
            StoreKind::Wal => "wal",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy of `url` with query parameter `name` set to `value`, replacing any
/// previous value.
pub fn with_param(url: &Url, name: &str, value: &str) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut out = url.clone();
    {
        let mut pairs = out.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(name, value);
    }
    out
}

pub fn param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Copy of `url` without query parameter `name`.
pub fn without_param(url: &Url, name: &str) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut out = url.clone();
    if kept.is_empty() {
        out.set_query(None);
    } else {
        out.query_pairs_mut().clear().extend_pairs(kept);
    }
    out
}

/// Base URL of one store of a ledger.
pub fn store_url(base: &Url, kind: StoreKind) -> Url {
    with_param(base, "store", kind.as_str())
}

/// The `key` parameter of an entry URL.
pub fn require_key(url: &Url) -> GatewayResult<String> {
    param(url, "key").ok_or_else(|| GatewayError::InvalidUrl {
        url: url.to_string(),
        reason: "missing key parameter".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("memory://ledger?name=test").unwrap()
    }

    #[test]
    fn with_param_replaces() {
        let url = with_param(&base(), "key", "a");
        let url = with_param(&url, "key", "b");
        assert_eq!(param(&url, "key").as_deref(), Some("b"));
        assert_eq!(param(&url, "name").as_deref(), Some("test"));
        assert_eq!(url.query_pairs().filter(|(k, _)| k == "key").count(), 1);
    }

    #[test]
    fn without_param_strips() {
        let url = with_param(&base(), "key", "a");
        let url = without_param(&url, "key");
        assert_eq!(param(&url, "key"), None);
        assert_eq!(param(&url, "name").as_deref(), Some("test"));

        let bare = Url::parse("memory://x?key=1").unwrap();
        assert_eq!(without_param(&bare, "key").query(), None);
    }

    #[test]
    fn store_urls_differ() {
        let data = store_url(&base(), StoreKind::Data);
        let meta = store_url(&base(), StoreKind::Meta);
        assert_ne!(data, meta);
        assert_eq!(param(&meta, "store").as_deref(), Some("meta"));
    }

    #[test]
    fn require_key_reports_url() {
        let err = require_key(&base()).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUrl { .. }));
        let keyed = with_param(&base(), "key", "k");
        assert_eq!(require_key(&keyed).unwrap(), "k");
    }
}

//! Authorization is deliberately left as a pluggable policy instead of
//! baked into the store: a local CLI has no need for it, while an HTTP
//! front end hangs one off each request's bearer token.

/// Whatever a transport's incoming request maps to: a token string, a
/// peer identity, or nothing at all for a purely local caller.
pub trait AuthOracle: Send + Sync {
    fn can_read(&self, package_name: &str) -> bool;
    fn can_write(&self, package_name: &str) -> bool;
}

/// The policy for a store with no access control: every caller can read
/// and write every package. What `bindepot init` wires up by default.
pub struct AllowAll;

impl AuthOracle for AllowAll {
    fn can_read(&self, _package_name: &str) -> bool {
        true
    }

    fn can_write(&self, _package_name: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allow_all_allows_everything() {
        let oracle = AllowAll;
        assert!(oracle.can_read("anything"));
        assert!(oracle.can_write("anything"));
    }
}

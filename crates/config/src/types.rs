use serde::Deserialize;

const MODULE_BLOCK: usize = 0;
const MODULE_BLOCK_RAW: usize = 4;
const MODULE_USERS: usize = 6;
const MODULE_NODE_TEST: usize = 7;

pub const MODULE_BLOCK_STR: &str = "block";
pub const MODULE_BLOCK_RAW_STR: &str = "block_raw";
pub const MODULE_USERS_STR: &str = "users";
pub const MODULE_NODE_TEST_STR: &str = "node_tests";

/// Set of enabled feature modules. Parsed once at startup, pinned into the
/// database on first run and compared on every subsequent start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modules(u8);

impl Modules {
    /// Parses module names; returns the offending name on failure.
    pub fn parse<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, String> {
        let mut bits = 0u8;
        for name in names {
            let bit = match name {
                MODULE_BLOCK_STR => MODULE_BLOCK,
                MODULE_BLOCK_RAW_STR => MODULE_BLOCK_RAW,
                MODULE_USERS_STR => MODULE_USERS,
                MODULE_NODE_TEST_STR => MODULE_NODE_TEST,
                other => return Err(other.to_string()),
            };
            bits |= 1 << bit;
        }
        Ok(Self(bits))
    }

    pub fn block(&self) -> bool {
        self.0 & (1 << MODULE_BLOCK) != 0
    }

    pub fn block_raw(&self) -> bool {
        self.0 & (1 << MODULE_BLOCK_RAW) != 0
    }

    pub fn users(&self) -> bool {
        self.0 & (1 << MODULE_USERS) != 0
    }

    pub fn node_test(&self) -> bool {
        self.0 & (1 << MODULE_NODE_TEST) != 0
    }

    /// Fixed-width bit string, most significant module first. This exact
    /// rendering is pinned in the database, so it must stay stable.
    pub fn to_bitset_string(self) -> String {
        format!("{:08b}", self.0)
    }

    pub fn from_bitset_string(s: &str) -> Option<Self> {
        if s.len() != 8 || !s.bytes().all(|b| b == b'0' || b == b'1') {
            return None;
        }
        u8::from_str_radix(s, 2).ok().map(Self)
    }
}

/// Block body layout version advertised by the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum BlockVersion {
    #[default]
    #[serde(rename = "v1", alias = "V1")]
    V1,
    #[serde(rename = "v2", alias = "V2")]
    V2,
}

/// Peer endpoints come either inline or as a graph file of `srv1, srv2`
/// edges; in the latter case every server mentioned in the file is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServersSource {
    List(Vec<String>),
    File { file: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitset_round_trip() {
        let modules = Modules::parse(["block", "users", "node_tests"]).unwrap();
        assert!(modules.block());
        assert!(!modules.block_raw());
        assert!(modules.users());
        assert!(modules.node_test());

        let s = modules.to_bitset_string();
        assert_eq!(s, "11000001");
        assert_eq!(Modules::from_bitset_string(&s), Some(modules));
        assert_eq!(Modules::from_bitset_string("banana"), None);
    }

    #[test]
    fn unknown_module_is_reported() {
        assert_eq!(Modules::parse(["block", "nope"]), Err("nope".to_string()));
    }
}

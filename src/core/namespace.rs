use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ZENON_NAMESPACE: &str = "zenon";
pub const ZENON_MAINNET: &str = "zenon:1";

pub const METHOD_INFO: &str = "znn_info";
pub const METHOD_SIGN: &str = "znn_sign";
pub const METHOD_SEND: &str = "znn_send";

pub const EVENT_CHAIN_ID_CHANGE: &str = "chainIdChange";
pub const EVENT_ADDRESS_CHANGE: &str = "addressChange";

/// The chains, methods and events declared for one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl Namespace {
    /// True when every chain, method and event of `required` is granted here.
    pub fn covers(&self, required: &Namespace) -> bool {
        required.chains.iter().all(|c| self.chains.contains(c))
            && required.methods.iter().all(|m| self.methods.contains(m))
            && required.events.iter().all(|e| self.events.contains(e))
    }
}

/// Capability set, keyed by namespace id. Used both for what a dApp requires
/// and for what a session was granted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespaces(pub BTreeMap<String, Namespace>);

pub type RequiredNamespaces = Namespaces;

impl Namespaces {
    pub fn zenon() -> Self {
        let mut map = BTreeMap::new();
        map.insert(
            ZENON_NAMESPACE.to_string(),
            Namespace {
                chains: vec![ZENON_MAINNET.to_string()],
                methods: vec![
                    METHOD_SIGN.to_string(),
                    METHOD_INFO.to_string(),
                    METHOD_SEND.to_string(),
                ],
                events: vec![
                    EVENT_CHAIN_ID_CHANGE.to_string(),
                    EVENT_ADDRESS_CHANGE.to_string(),
                ],
            },
        );
        Namespaces(map)
    }

    /// True when this granted set satisfies every required namespace.
    pub fn satisfies(&self, required: &Namespaces) -> bool {
        required.0.iter().all(|(key, needed)| {
            self.0
                .get(key)
                .map(|granted| granted.covers(needed))
                .unwrap_or(false)
        })
    }

    /// First chain declared across all namespaces, used as the request scope.
    pub fn primary_chain(&self) -> Option<&str> {
        self.0
            .values()
            .flat_map(|ns| ns.chains.iter())
            .map(String::as_str)
            .next()
    }
}

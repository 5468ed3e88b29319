//! Event ABI table and log decoding.
//!
//! `topics[0]` is `keccak256` of the canonical event signature. Indexed
//! parameters (all addresses here) sit in `topics[1..]`; the rest are
//! ABI-encoded, in declaration order, in `data`.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, Address, B256};

use liraindex_core::error::IndexerError;
use liraindex_core::types::{AbiValue, EventArgs, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint8,
    Uint256,
    String,
}

impl ParamType {
    fn canonical(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Uint8 => "uint8",
            Self::Uint256 => "uint256",
            Self::String => "string",
        }
    }

    fn dyn_type(&self) -> DynSolType {
        match self {
            Self::Address => DynSolType::Address,
            Self::Uint8 => DynSolType::Uint(8),
            Self::Uint256 => DynSolType::Uint(256),
            Self::String => DynSolType::String,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub ty: ParamType,
    pub indexed: bool,
}

const fn indexed(name: &'static str) -> Param {
    Param { name, ty: ParamType::Address, indexed: true }
}

const fn data(name: &'static str, ty: ParamType) -> Param {
    Param { name, ty, indexed: false }
}

const TRANSFER: &[Param] = &[indexed("from"), indexed("to"), data("value", ParamType::Uint256)];
const APPROVAL: &[Param] = &[indexed("owner"), indexed("spender"), data("value", ParamType::Uint256)];
const TOKEN_REGISTERED: &[Param] = &[
    indexed("tokenAddress"),
    indexed("owner"),
    data("tokenType", ParamType::Uint8),
    data("registryId", ParamType::Uint256),
];
const TOKEN_UPDATED: &[Param] =
    &[indexed("tokenAddress"), indexed("owner"), data("tokenType", ParamType::Uint8)];
const TOKEN_REMOVED: &[Param] = &[indexed("tokenAddress")];
const PROFILE_CREATED: &[Param] = &[
    indexed("userAddress"),
    data("handle", ParamType::String),
    data("metadataURI", ParamType::String),
];
const PROFILE_UPDATED: &[Param] = &[indexed("userAddress"), data("metadataURI", ParamType::String)];
const HANDLE_UPDATED: &[Param] = &[
    indexed("userAddress"),
    data("oldHandle", ParamType::String),
    data("newHandle", ParamType::String),
];
const PRIMARY_TOKEN_LINKED: &[Param] = &[indexed("userAddress"), indexed("tokenAddress")];
const FOLLOW: &[Param] = &[indexed("follower"), indexed("following")];
const BLOCK: &[Param] = &[indexed("blocker"), indexed("blocked")];
const MUTE: &[Param] = &[indexed("muter"), indexed("muted")];
const TOKEN_LAUNCHED: &[Param] = &[
    indexed("tokenAddress"),
    indexed("creator"),
    data("name", ParamType::String),
    data("symbol", ParamType::String),
    data("totalSupply", ParamType::Uint256),
];
const USER_TOKEN_CREATED: &[Param] = &[
    indexed("tokenAddress"),
    indexed("creator"),
    data("name", ParamType::String),
    data("symbol", ParamType::String),
];

/// Parameter list for each event, in declaration order.
pub fn params(event: EventKind) -> &'static [Param] {
    use EventKind as E;
    match event {
        E::Transfer => TRANSFER,
        E::Approval => APPROVAL,
        E::TokenRegistered => TOKEN_REGISTERED,
        E::TokenUpdated => TOKEN_UPDATED,
        E::TokenRemoved => TOKEN_REMOVED,
        E::ProfileCreated => PROFILE_CREATED,
        E::ProfileUpdated => PROFILE_UPDATED,
        E::HandleUpdated => HANDLE_UPDATED,
        E::PrimaryTokenLinked => PRIMARY_TOKEN_LINKED,
        E::Followed | E::Unfollowed => FOLLOW,
        E::Blocked | E::Unblocked => BLOCK,
        E::Muted | E::Unmuted => MUTE,
        E::TokenLaunched => TOKEN_LAUNCHED,
        E::ReputationTokenCreated | E::SocialTokenCreated | E::AccessTokenCreated => {
            USER_TOKEN_CREATED
        }
    }
}

/// Canonical signature, e.g. `Transfer(address,address,uint256)`.
pub fn signature(event: EventKind) -> String {
    let types: Vec<&str> = params(event).iter().map(|p| p.ty.canonical()).collect();
    format!("{}({})", event.name(), types.join(","))
}

pub fn topic0(event: EventKind) -> B256 {
    keccak256(signature(event).as_bytes())
}

/// `topic0` as a `0x`-prefixed lower-case hex string.
pub fn topic0_hex(event: EventKind) -> String {
    format!("0x{}", hex::encode(topic0(event)))
}

/// Which of `candidates` a log's first topic belongs to.
pub fn event_for_topic(candidates: &[EventKind], topic: &str) -> Option<EventKind> {
    let topic = topic.to_ascii_lowercase();
    candidates.iter().copied().find(|e| topic0_hex(*e) == topic)
}

fn hex_bytes(s: &str) -> Result<Vec<u8>, IndexerError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| IndexerError::Decode(format!("invalid hex: {e}")))
}

fn to_abi_value(value: DynSolValue) -> Result<AbiValue, IndexerError> {
    match value {
        DynSolValue::Address(a) => Ok(AbiValue::Address(format!("0x{}", hex::encode(a.as_slice())))),
        DynSolValue::Uint(v, _) => Ok(AbiValue::Uint(v)),
        DynSolValue::Bool(b) => Ok(AbiValue::Bool(b)),
        DynSolValue::String(s) => Ok(AbiValue::String(s)),
        other => Err(IndexerError::Decode(format!("unsupported ABI value {other:?}"))),
    }
}

/// Decode a log's topics and data into named arguments.
pub fn decode_log(event: EventKind, topics: &[String], data: &str) -> Result<EventArgs, IndexerError> {
    let params = params(event);
    let mut args = EventArgs::new();

    match topics.first() {
        Some(t) if t.eq_ignore_ascii_case(&topic0_hex(event)) => {}
        other => {
            return Err(IndexerError::Decode(format!(
                "topic0 {other:?} does not match {}",
                signature(event)
            )))
        }
    }

    let indexed: Vec<&Param> = params.iter().filter(|p| p.indexed).collect();
    if topics.len() != indexed.len() + 1 {
        return Err(IndexerError::Decode(format!(
            "{} expects {} topics, got {}",
            event,
            indexed.len() + 1,
            topics.len()
        )));
    }
    for (param, topic) in indexed.iter().zip(&topics[1..]) {
        let word = hex_bytes(topic)?;
        let value = param
            .ty
            .dyn_type()
            .abi_decode(&word)
            .map_err(|e| IndexerError::Decode(format!("topic '{}': {e}", param.name)))?;
        args.insert(param.name, to_abi_value(value)?);
    }

    let body: Vec<&Param> = params.iter().filter(|p| !p.indexed).collect();
    if !body.is_empty() {
        let bytes = hex_bytes(data)?;
        let tuple = DynSolType::Tuple(body.iter().map(|p| p.ty.dyn_type()).collect());
        let decoded = tuple
            .abi_decode_sequence(&bytes)
            .map_err(|e| IndexerError::Decode(format!("{} data: {e}", event)))?;
        let values = match decoded {
            DynSolValue::Tuple(values) => values,
            other => vec![other],
        };
        for (param, value) in body.iter().zip(values) {
            args.insert(param.name, to_abi_value(value)?);
        }
    }

    Ok(args)
}

fn to_dyn_value(param: &Param, value: Option<&AbiValue>) -> Result<DynSolValue, IndexerError> {
    match (param.ty, value) {
        (ParamType::Address, Some(AbiValue::Address(a))) => a
            .parse::<Address>()
            .map(DynSolValue::Address)
            .map_err(|e| IndexerError::Decode(format!("'{}': {e}", param.name))),
        (ParamType::Uint8, Some(AbiValue::Uint(v))) => Ok(DynSolValue::Uint(*v, 8)),
        (ParamType::Uint256, Some(AbiValue::Uint(v))) => Ok(DynSolValue::Uint(*v, 256)),
        (ParamType::String, Some(AbiValue::String(s))) => Ok(DynSolValue::String(s.clone())),
        (_, other) => Err(IndexerError::Decode(format!(
            "cannot encode '{}' as {}: {other:?}",
            param.name,
            param.ty.canonical()
        ))),
    }
}

/// Encode arguments back into `(topics, data)`, as a node would emit them.
pub fn encode_log(event: EventKind, args: &EventArgs) -> Result<(Vec<String>, String), IndexerError> {
    let mut topics = vec![topic0_hex(event)];
    let mut body = Vec::new();
    for param in params(event) {
        let value = to_dyn_value(param, args.get(param.name))?;
        if param.indexed {
            topics.push(format!("0x{}", hex::encode(value.abi_encode())));
        } else {
            body.push(value);
        }
    }
    let data = if body.is_empty() {
        Vec::new()
    } else {
        DynSolValue::Tuple(body).abi_encode_params()
    };
    Ok((topics, format!("0x{}", hex::encode(data))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn transfer_topic_is_erc20() {
        assert_eq!(signature(EventKind::Transfer), "Transfer(address,address,uint256)");
        assert_eq!(
            topic0_hex(EventKind::Transfer),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn signatures_are_distinct() {
        let mut topics: Vec<String> = EventKind::ALL.iter().map(|e| topic0_hex(*e)).collect();
        topics.sort();
        topics.dedup();
        assert_eq!(topics.len(), EventKind::ALL.len());
    }

    #[test]
    fn decodes_known_transfer_log() {
        let topics = vec![
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef".to_string(),
            "0x0000000000000000000000000000000000000000000000000000000000000000".to_string(),
            "0x000000000000000000000000cccccccccccccccccccccccccccccccccccccccc".to_string(),
        ];
        let data = "0x00000000000000000000000000000000000000000000000000000000000001f4";

        let args = decode_log(EventKind::Transfer, &topics, data).unwrap();
        assert_eq!(args.address("from").unwrap(), "0x0000000000000000000000000000000000000000");
        assert_eq!(args.address("to").unwrap(), "0xcccccccccccccccccccccccccccccccccccccccc");
        assert_eq!(args.uint("value").unwrap(), U256::from(500u64));
    }

    #[test]
    fn dynamic_strings_survive_encoding() {
        let args = EventArgs::new()
            .with("tokenAddress", AbiValue::Address("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into()))
            .with("creator", AbiValue::Address("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".into()))
            .with("name", AbiValue::String("Foo".into()))
            .with("symbol", AbiValue::String("FOO".into()))
            .with("totalSupply", AbiValue::Uint(U256::from(1000u64)));

        let (topics, data) = encode_log(EventKind::TokenLaunched, &args).unwrap();
        assert_eq!(topics.len(), 3);
        let decoded = decode_log(EventKind::TokenLaunched, &topics, &data).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn rejects_wrong_topic_count() {
        let topics = vec![topic0_hex(EventKind::Followed)];
        let err = decode_log(EventKind::Followed, &topics, "0x").unwrap_err();
        assert!(err.to_string().contains("expects 3 topics"));
    }

    #[test]
    fn matches_topic_among_candidates() {
        let candidates = [EventKind::Followed, EventKind::Blocked];
        let topic = topic0_hex(EventKind::Blocked).to_uppercase().replace("0X", "0x");
        assert_eq!(event_for_topic(&candidates, &topic), Some(EventKind::Blocked));
        assert_eq!(event_for_topic(&candidates, &topic0_hex(EventKind::Muted)), None);
    }
}

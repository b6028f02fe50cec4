//! The three wallet methods the Zenon namespace grants.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::client::{SessionRequest, SignClient};
use crate::core::namespace::{METHOD_INFO, METHOD_SEND, METHOD_SIGN};
use crate::core::{ConnectError, Session, WalletInfo};

const ZNN_TOKEN_STANDARD: &str = "zts1znnxxxxxxxxxxxxx9z4ulx";
/// Amount of the self-send issued through `znn_send`: 1 ZNN at 8 decimals.
pub const DUMMY_SEND_AMOUNT: &str = "100000000";
/// Amount of the self-send only signed through `znn_sign`: 1.1 ZNN.
pub const DUMMY_SIGN_AMOUNT: &str = "110000000";
const BLOCK_TYPE_USER_SEND: u64 = 2;
const DEFAULT_CHAIN_IDENTIFIER: u64 = 1;
const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^z1[02-9ac-hj-np-z]{38}$").expect("address pattern is valid")
    })
}

pub fn is_valid_address(address: &str) -> bool {
    address_pattern().is_match(address)
}

async fn call(
    client: &dyn SignClient,
    session: &Session,
    chain_id: &str,
    method: &str,
    params: Value,
) -> Result<Value, ConnectError> {
    tracing::debug!("{} on session {} ({})", method, session.topic, chain_id);
    let result = client
        .request(SessionRequest {
            topic: session.topic.clone(),
            chain_id: chain_id.to_string(),
            method: method.to_string(),
            params,
        })
        .await
        .map_err(|e| {
            tracing::error!("{} failed: {}", method, e);
            ConnectError::request(method, e)
        })?;
    tracing::debug!("{} result: {}", method, result);
    Ok(result)
}

pub async fn get_info(
    client: &dyn SignClient,
    session: &Session,
    chain_id: &str,
) -> Result<WalletInfo, ConnectError> {
    let result = call(client, session, chain_id, METHOD_INFO, Value::Null).await?;
    serde_json::from_value(result).map_err(|e| ConnectError::request(METHOD_INFO, e))
}

/// The wallet expects the account block as a JSON-encoded string.
pub async fn sign_transaction(
    client: &dyn SignClient,
    session: &Session,
    chain_id: &str,
    account_block: &Value,
) -> Result<Value, ConnectError> {
    let encoded = serde_json::to_string(account_block)
        .map_err(|e| ConnectError::request(METHOD_SIGN, e))?;
    call(client, session, chain_id, METHOD_SIGN, Value::String(encoded)).await
}

pub async fn send_transaction(
    client: &dyn SignClient,
    session: &Session,
    chain_id: &str,
    from_address: &str,
    account_block: Value,
) -> Result<Value, ConnectError> {
    let params = json!({
        "fromAddress": from_address,
        "accountBlock": account_block,
    });
    call(client, session, chain_id, METHOD_SEND, params).await
}

/// A send of `amount` ZNN base units from `address` back to itself.
pub fn dummy_send_block(
    address: &str,
    chain_id: Option<u64>,
    amount: &str,
) -> Result<Value, ConnectError> {
    if address.is_empty() {
        return Err(ConnectError::NotConnected("You must get wallet info first!"));
    }
    if !is_valid_address(address) {
        return Err(ConnectError::request(
            METHOD_SEND,
            format!("{} is not a valid Zenon address", address),
        ));
    }

    let chain_identifier = chain_id
        .filter(|id| *id != 0)
        .unwrap_or(DEFAULT_CHAIN_IDENTIFIER);

    Ok(json!({
        "version": 1,
        "chainIdentifier": chain_identifier,
        "blockType": BLOCK_TYPE_USER_SEND,
        "hash": ZERO_HASH,
        "previousHash": ZERO_HASH,
        "height": 0,
        "momentumAcknowledged": { "hash": ZERO_HASH, "height": 0 },
        "address": address,
        "toAddress": address,
        "amount": amount,
        "tokenStandard": ZNN_TOKEN_STANDARD,
        "fromBlockHash": ZERO_HASH,
        "descendantBlocks": [],
        "data": "",
        "fusedPlasma": 0,
        "difficulty": 0,
        "nonce": "0000000000000000",
        "publicKey": "",
        "signature": "",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "z1qqjnwjjpnue8xmmpanz6csze6tcmtzzdtfsww7";

    #[test]
    fn test_address_shape() {
        assert!(is_valid_address(ADDRESS));
        assert!(!is_valid_address("z1short"));
        assert!(!is_valid_address("0x8ba1f109551bd432803012645ac136ddd64dba72"));
    }

    #[test]
    fn test_dummy_block_requires_address() {
        let err = dummy_send_block("", None, DUMMY_SEND_AMOUNT).unwrap_err();
        assert!(err.to_string().contains("You must get wallet info first!"));
    }

    #[test]
    fn test_dummy_block_sends_one_znn_to_self() {
        let block = dummy_send_block(ADDRESS, Some(3), DUMMY_SEND_AMOUNT).unwrap();
        assert_eq!(block["address"], ADDRESS);
        assert_eq!(block["toAddress"], ADDRESS);
        assert_eq!(block["amount"], "100000000");
        assert_eq!(block["tokenStandard"], ZNN_TOKEN_STANDARD);
        assert_eq!(block["chainIdentifier"], 3);

        let default_chain = dummy_send_block(ADDRESS, Some(0), DUMMY_SEND_AMOUNT).unwrap();
        assert_eq!(default_chain["chainIdentifier"], DEFAULT_CHAIN_IDENTIFIER);
    }

    #[test]
    fn test_dummy_sign_block_carries_one_point_one_znn() {
        let block = dummy_send_block(ADDRESS, Some(1), DUMMY_SIGN_AMOUNT).unwrap();
        assert_eq!(block["amount"], "110000000");
        assert_eq!(block["toAddress"], ADDRESS);
        assert_eq!(block["chainIdentifier"], 1);
    }
}

use crate::database::ReplicaId;
use crate::durability::{ErrorDomain, InvocationEvent, InvokerEvent, InvokerOutcome, Phase, ResultComparison, TransactionId};
use crate::storage::{Keyspace, StorageError};
use serde::{Deserialize, Serialize};

/// Key byte representation:
///
/// ```text
/// | 0 | 1 | 2 | ... | n+1 |n+2|n+3| ...                 |
/// +---+---+---+-...-+-----+---+---+-...-----------------+
/// | TxLen |  Tx (TxLen bytes) |Phs| ReplicaId (invokers) |
/// +-------+-------------------+---+---------------------+
/// ```
///
/// * `TxLen` - big endian u16 length of the transaction id
/// * `Phs` - phase code
/// * `ReplicaId` - utf8, only present in the invokers keyspace
///
/// An invocation's key is a prefix of all of its invokers' keys, so one prefix scan finds them.
pub(super) fn invocation_key(transaction_id: &TransactionId, phase: Phase) -> Vec<u8> {
    let tx = transaction_id.as_bytes();
    let mut key = Vec::with_capacity(2 + tx.len() + 1);
    key.extend_from_slice(&(tx.len() as u16).to_be_bytes());
    key.extend_from_slice(tx);
    key.push(phase.code());
    key
}

pub(super) fn invoker_key(transaction_id: &TransactionId, phase: Phase, replica_id: &ReplicaId) -> Vec<u8> {
    let mut key = invocation_key(transaction_id, phase);
    key.extend_from_slice(replica_id.as_str().as_bytes());
    key
}

/// Splits a key back into (transaction id, phase, trailing bytes).
fn decode_key(keyspace: Keyspace, key: &[u8]) -> Result<(TransactionId, Phase, &[u8]), StorageError> {
    if key.len() < 3 {
        return Err(corrupt(keyspace, "key too short"));
    }
    let tx_len = u16::from_be_bytes([key[0], key[1]]) as usize;
    if key.len() < 2 + tx_len + 1 {
        return Err(corrupt(keyspace, "key shorter than its transaction id"));
    }
    let transaction_id = TransactionId::from_bytes(key[2..2 + tx_len].to_vec());
    let phase = Phase::from_code(key[2 + tx_len]).ok_or_else(|| corrupt(keyspace, "unknown phase"))?;

    Ok((transaction_id, phase, &key[2 + tx_len + 1..]))
}

/// Values are one format version byte followed by a JSON document.
const RECORD_FORMAT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct InvocationRecord {
    error_domain: ErrorDomain,
    comparison: ResultComparison,
}

pub(super) fn encode_invocation(event: &InvocationEvent) -> Vec<u8> {
    encode_value(&InvocationRecord {
        error_domain: event.error_domain,
        comparison: event.comparison,
    })
}

pub(super) fn decode_invocation(key: &[u8], value: &[u8]) -> Result<InvocationEvent, StorageError> {
    let keyspace = Keyspace::Invocations;
    let (transaction_id, phase, rest) = decode_key(keyspace, key)?;
    if !rest.is_empty() {
        return Err(corrupt(keyspace, "trailing key bytes"));
    }
    let record: InvocationRecord = decode_value(keyspace, value)?;

    Ok(InvocationEvent {
        transaction_id,
        phase,
        error_domain: record.error_domain,
        comparison: record.comparison,
    })
}

pub(super) fn encode_invoker(event: &InvokerEvent) -> Vec<u8> {
    encode_value(&event.outcome)
}

pub(super) fn decode_invoker(key: &[u8], value: &[u8]) -> Result<InvokerEvent, StorageError> {
    let keyspace = Keyspace::Invokers;
    let (transaction_id, phase, rest) = decode_key(keyspace, key)?;
    let replica_id = std::str::from_utf8(rest).map_err(|_| corrupt(keyspace, "replica id is not utf8"))?;
    let outcome: InvokerOutcome = decode_value(keyspace, value)?;

    Ok(InvokerEvent {
        transaction_id,
        phase,
        replica_id: ReplicaId::new(replica_id),
        outcome,
    })
}

fn encode_value<T: Serialize>(value: &T) -> Vec<u8> {
    let mut bytes = vec![RECORD_FORMAT_VERSION];
    serde_json::to_writer(&mut bytes, value)
        .expect("Durability records hold only string-keyed data, which always serializes");
    bytes
}

fn decode_value<T: for<'de> Deserialize<'de>>(keyspace: Keyspace, bytes: &[u8]) -> Result<T, StorageError> {
    match bytes.split_first() {
        Some((&RECORD_FORMAT_VERSION, json)) => {
            serde_json::from_slice(json).map_err(|e| corrupt(keyspace, &e.to_string()))
        }
        Some((version, _)) => Err(corrupt(keyspace, &format!("unsupported format version {}", version))),
        None => Err(corrupt(keyspace, "empty value")),
    }
}

fn corrupt(keyspace: Keyspace, message: &str) -> StorageError {
    StorageError::Corrupt {
        keyspace: keyspace.name(),
        message: message.to_string(),
    }
}

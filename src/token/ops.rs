use super::pool::{BASIC_POOL, Pool, SUPER_POOL};
use super::record::{TokenEntry, normalize_token};
use serde_json::{Map, Value, json};
use std::collections::HashSet;

/// Parse a persisted pool payload (`{pool_name: [entry, ...]}`) into ordered
/// pools. Pool traversal order is canonical: basic, super, then any extra
/// pools in payload order. Duplicate tokens within a pool keep the first
/// occurrence; malformed entries are dropped rather than failing the load.
/// A non-object blob falls back to the empty defaults; admin writes reject
/// such payloads before they reach this point.
pub fn payload_to_pools(payload: &Value) -> Vec<Pool> {
    let Some(map) = payload.as_object() else {
        return default_pools();
    };

    let mut names: Vec<&String> = Vec::new();
    for canonical in [BASIC_POOL, SUPER_POOL] {
        if let Some((name, _)) = map.get_key_value(canonical) {
            names.push(name);
        }
    }
    for name in map.keys() {
        if name != BASIC_POOL && name != SUPER_POOL {
            names.push(name);
        }
    }

    let mut pools = Vec::with_capacity(names.len().max(2));
    for name in names {
        let mut pool = Pool::new(name.clone());
        let mut seen = HashSet::new();
        if let Some(entries) = map.get(name).and_then(Value::as_array) {
            for raw in entries {
                let Ok(entry) = serde_json::from_value::<TokenEntry>(raw.clone()) else {
                    continue;
                };
                if let Some(record) = entry.into_record() {
                    if seen.insert(record.token.clone()) {
                        pool.records.push(record);
                    }
                }
            }
        }
        pools.push(pool);
    }

    // The two canonical pools always exist so admin writes have a target.
    for canonical in [BASIC_POOL, SUPER_POOL] {
        if !pools.iter().any(|p| p.name == canonical) {
            pools.push(Pool::new(canonical));
        }
    }
    pools.sort_by_key(|p| match p.name.as_str() {
        BASIC_POOL => 0,
        SUPER_POOL => 1,
        _ => 2,
    });
    pools
}

/// Serialize pools back into the persisted payload shape. Records round-trip
/// in full object form, carrying any unknown fields they arrived with.
pub fn pools_to_payload(pools: &[Pool]) -> Value {
    let mut map = Map::new();
    for pool in pools {
        let entries: Vec<Value> = pool
            .records
            .iter()
            .filter_map(|record| serde_json::to_value(record).ok())
            .collect();
        map.insert(pool.name.clone(), Value::Array(entries));
    }
    Value::Object(map)
}

/// Every unique normalized token mentioned in a payload, traversal order.
pub fn payload_tokens(payload: &Value) -> Vec<String> {
    payload_to_pools(payload)
        .iter()
        .flat_map(|pool| pool.records.iter().map(|r| r.token.clone()))
        .fold((HashSet::new(), Vec::new()), |(mut seen, mut out), token| {
            if seen.insert(token.clone()) {
                out.push(token);
            }
            (seen, out)
        })
        .1
}

/// Tokens present in `new` but absent from `old`; drives post-update
/// remediation so pre-existing credentials are never re-provisioned.
pub fn added_tokens(old: &Value, new: &Value) -> Vec<String> {
    let existing: HashSet<String> = payload_tokens(old).into_iter().collect();
    payload_tokens(new)
        .into_iter()
        .filter(|token| !existing.contains(normalize_token(token).as_str()))
        .collect()
}

pub fn default_pools() -> Vec<Pool> {
    vec![Pool::new(BASIC_POOL), Pool::new(SUPER_POOL)]
}

pub fn empty_payload() -> Value {
    json!({ BASIC_POOL: [], SUPER_POOL: [] })
}

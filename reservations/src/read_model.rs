//! Keys and lookup helpers shared by the projectors.

use crate::types::ReservationId;
use roomledger_core::projection::{ProjectionStore, Result};
use serde::de::DeserializeOwned;

/// Key of a reservation view.
#[must_use]
pub fn reservation_key(id: ReservationId) -> String {
    format!("reservation:{id}")
}

/// Key of a user's billing history.
#[must_use]
pub fn billing_key(user: &str) -> String {
    format!("billing:{user}")
}

/// Load an entity, building a fresh one when the key is missing.
///
/// # Errors
///
/// Propagates storage and decoding failures. A missing key is not an error.
pub async fn find_or_else<S, T, F>(store: &S, key: &str, fresh: F) -> Result<T>
where
    S: ProjectionStore,
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    Ok(store.find(key).await?.unwrap_or_else(fresh))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use roomledger_testing::InMemoryProjectionStore;

    #[test]
    fn keys_are_namespaced() {
        let id = ReservationId::new();
        assert_eq!(reservation_key(id), format!("reservation:{id}"));
        assert_eq!(billing_key("Matt"), "billing:Matt");
    }

    #[tokio::test]
    async fn missing_keys_build_fresh_values() {
        let store = InMemoryProjectionStore::new();
        let value: Vec<u32> = find_or_else(&store, "nothing", || vec![7]).await.unwrap();
        assert_eq!(value, vec![7]);

        store.put("something", &vec![1_u32, 2]).await.unwrap();
        let value: Vec<u32> = find_or_else(&store, "something", Vec::new).await.unwrap();
        assert_eq!(value, vec![1, 2]);
    }
}

//! Chain account state with snapshot reads and single-writer mutation.

use crate::error::{StateError, StateResult};
use parking_lot::RwLock;
use splendor_types::{Address, H256};
use std::collections::HashMap;
use tracing::instrument;

/// A single account: native balance plus raw key/value storage.
///
/// Storage is only used by system accounts (the anti-replay registry); user
/// accounts carry balances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: u128,
    pub nonce: u64,
    pub storage: HashMap<H256, Vec<u8>>,
}

/// Read access to account state, satisfied by both the live state and
/// point-in-time snapshots.
pub trait StateReader: Send + Sync {
    fn balance(&self, address: &Address) -> u128;
    fn account_nonce(&self, address: &Address) -> u64;
    fn storage_contains(&self, address: &Address, key: &H256) -> bool;
}

#[derive(Default)]
struct StateInner {
    accounts: HashMap<Address, Account>,
    height: u64,
}

/// The live chain state.
pub struct ChainState {
    inner: RwLock<StateInner>,
}

impl ChainState {
    pub fn new() -> Self {
        Self { inner: RwLock::new(StateInner::default()) }
    }

    /// Seed an account balance (genesis allocation and tests).
    pub fn set_balance(&self, address: Address, balance: u128) {
        self.inner.write().accounts.entry(address).or_default().balance = balance;
    }

    pub fn height(&self) -> u64 {
        self.inner.read().height
    }

    /// A point-in-time copy for concurrent readers. The RPC verify path
    /// works against snapshots so it never contends with block execution.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        StateSnapshot { accounts: inner.accounts.clone(), height: inner.height }
    }

    /// Open the single-writer mutation scope for executing one block.
    /// Changes are buffered and become visible only at [`StateWriter::commit`];
    /// dropping the writer aborts the block with no state change.
    pub fn begin_block(&self, height: u64) -> StateWriter<'_> {
        StateWriter { state: self, pending: HashMap::new(), height }
    }

    fn account(&self, address: &Address) -> Option<Account> {
        self.inner.read().accounts.get(address).cloned()
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new()
    }
}

impl StateReader for ChainState {
    fn balance(&self, address: &Address) -> u128 {
        self.inner.read().accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    fn account_nonce(&self, address: &Address) -> u64 {
        self.inner.read().accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    fn storage_contains(&self, address: &Address, key: &H256) -> bool {
        self.inner
            .read()
            .accounts
            .get(address)
            .map(|a| a.storage.contains_key(key))
            .unwrap_or(false)
    }
}

/// A detached, immutable copy of the state.
#[derive(Clone)]
pub struct StateSnapshot {
    accounts: HashMap<Address, Account>,
    pub height: u64,
}

impl StateReader for StateSnapshot {
    fn balance(&self, address: &Address) -> u128 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    fn account_nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    fn storage_contains(&self, address: &Address, key: &H256) -> bool {
        self.accounts.get(address).map(|a| a.storage.contains_key(key)).unwrap_or(false)
    }
}

/// Buffered write access to the state for the duration of one block.
///
/// Reads see pending changes overlaid on the committed state, so settlement
/// rules observe earlier transactions in the same block. Nothing is visible
/// to other readers until `commit`.
pub struct StateWriter<'a> {
    state: &'a ChainState,
    pending: HashMap<Address, Account>,
    height: u64,
}

impl StateWriter<'_> {
    fn account(&self, address: &Address) -> Account {
        if let Some(account) = self.pending.get(address) {
            return account.clone();
        }
        self.state.account(address).unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.account(address).balance
    }

    pub fn storage_contains(&self, address: &Address, key: &H256) -> bool {
        self.account(address).storage.contains_key(key)
    }

    /// Move `value` wei between accounts.
    #[instrument(skip(self), fields(height = self.height))]
    pub fn transfer(&mut self, from: Address, to: Address, value: u128) -> StateResult<()> {
        let mut from_account = self.account(&from);
        if from_account.balance < value {
            return Err(StateError::InsufficientBalance {
                address: from,
                have: from_account.balance,
                need: value,
            });
        }
        let mut to_account = self.account(&to);
        to_account.balance = to_account
            .balance
            .checked_add(value)
            .ok_or(StateError::BalanceOverflow(to))?;
        from_account.balance -= value;

        self.pending.insert(from, from_account);
        self.pending.insert(to, to_account);
        Ok(())
    }

    pub fn set_storage(&mut self, address: Address, key: H256, value: Vec<u8>) {
        let mut account = self.account(&address);
        account.storage.insert(key, value);
        self.pending.insert(address, account);
    }

    pub fn bump_nonce(&mut self, address: Address) {
        let mut account = self.account(&address);
        account.nonce += 1;
        self.pending.insert(address, account);
    }

    /// Commit the block: publish buffered accounts and advance the height.
    pub fn commit(self) {
        let mut inner = self.state.inner.write();
        for (address, account) in self.pending {
            inner.accounts.insert(address, account);
        }
        inner.height = self.height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn transfer_moves_exact_amounts() {
        let state = ChainState::new();
        state.set_balance(addr(1), 10_000_000_000_000_000);

        let mut writer = state.begin_block(1);
        writer.transfer(addr(1), addr(2), 1_000_000_000_000_000).unwrap();
        writer.commit();

        assert_eq!(state.balance(&addr(1)), 9_000_000_000_000_000);
        assert_eq!(state.balance(&addr(2)), 1_000_000_000_000_000);
        assert_eq!(state.height(), 1);
    }

    #[test]
    fn transfer_fails_without_funds() {
        let state = ChainState::new();
        state.set_balance(addr(1), 5);

        let mut writer = state.begin_block(1);
        let err = writer.transfer(addr(1), addr(2), 10).unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { have: 5, need: 10, .. }));
    }

    #[test]
    fn dropped_writer_discards_all_changes() {
        let state = ChainState::new();
        state.set_balance(addr(1), 100);

        let mut writer = state.begin_block(1);
        writer.transfer(addr(1), addr(2), 40).unwrap();
        writer.set_storage(addr(9), H256::keccak(b"k"), Vec::new());
        drop(writer);

        assert_eq!(state.balance(&addr(1)), 100);
        assert_eq!(state.balance(&addr(2)), 0);
        assert!(!state.storage_contains(&addr(9), &H256::keccak(b"k")));
        assert_eq!(state.height(), 0);
    }

    #[test]
    fn writer_reads_see_pending_changes() {
        let state = ChainState::new();
        state.set_balance(addr(1), 100);

        let mut writer = state.begin_block(1);
        writer.transfer(addr(1), addr(2), 60).unwrap();
        assert_eq!(writer.balance(&addr(1)), 40);
        assert_eq!(writer.balance(&addr(2)), 60);

        // Second transfer in the same block spends the updated balance.
        let err = writer.transfer(addr(1), addr(3), 50).unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { have: 40, .. }));
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let state = ChainState::new();
        state.set_balance(addr(1), 100);

        let snapshot = state.snapshot();
        let mut writer = state.begin_block(1);
        writer.transfer(addr(1), addr(2), 40).unwrap();
        writer.commit();

        assert_eq!(snapshot.balance(&addr(1)), 100);
        assert_eq!(state.balance(&addr(1)), 60);
    }

    #[test]
    fn storage_round_trip() {
        let state = ChainState::new();
        let key = H256::keccak(b"slot");

        assert!(!state.storage_contains(&addr(9), &key));
        let mut writer = state.begin_block(1);
        writer.set_storage(addr(9), key, Vec::new());
        writer.commit();
        assert!(state.storage_contains(&addr(9), &key));
    }
}

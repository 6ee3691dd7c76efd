//! State-machine tests for the scan/reconcile engine
//!
//! Run with: cargo test --test watcher_test -- --nocapture
//!
//! The engine is exercised against an in-memory ledger and a scripted
//! chain client, so these tests cover the exactly-once and watermark
//! guarantees without any infrastructure. The environment test at the
//! bottom needs a running database and RPC endpoints and is ignored by
//! default.

use bigdecimal::BigDecimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use custody_watcher::chain::{BlockTransfer, ChainClient, TxLookup};
use custody_watcher::reconciler::Reconciler;
use custody_watcher::types::{Currency, DepositStatus, WithdrawalStatus};
use custody_watcher::watchers::Scanner;

use helpers::{MemLedger, MockChain};

mod helpers {
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use eyre::Result;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};

    use custody_watcher::chain::{BlockTransfer, ChainClient, ChainError, TxLookup};
    use custody_watcher::db::{
        Deposit, DepositAccount, NewDeposit, NewUnauthorizedWithdrawal, Withdrawal,
    };
    use custody_watcher::ledger::Ledger;
    use custody_watcher::types::{Currency, DepositStatus, WithdrawalStatus};

    /// In-memory stand-in for the ledger store. Mirrors the two store
    /// properties the engine relies on: unique (tx_hash, currency)
    /// inserts and status-guarded conditional updates.
    #[derive(Clone, Default)]
    pub struct MemLedger {
        inner: Arc<Mutex<State>>,
    }

    #[derive(Default)]
    struct State {
        accounts: HashMap<Currency, Vec<DepositAccount>>,
        deposits: Vec<Deposit>,
        withdrawals: Vec<Withdrawal>,
        balances: HashMap<(i64, Currency), BigDecimal>,
        next_id: i64,
    }

    impl State {
        fn next_id(&mut self) -> i64 {
            self.next_id += 1;
            self.next_id
        }
    }

    impl MemLedger {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_user(&self, user_id: i64, currency: Currency, address: &str, balance: &str) {
            let mut state = self.inner.lock().unwrap();
            state.accounts.entry(currency).or_default().push(DepositAccount {
                user_id,
                address: address.to_string(),
            });
            state.balances.insert(
                (user_id, currency),
                BigDecimal::from_str(balance).unwrap(),
            );
        }

        pub fn add_pending_withdrawal(
            &self,
            user_id: i64,
            tx_hash: &str,
            currency: Currency,
            amount: &str,
            from_address: &str,
            to_address: &str,
        ) {
            let mut state = self.inner.lock().unwrap();
            let id = state.next_id();
            state.withdrawals.push(Withdrawal {
                id,
                user_id,
                tx_hash: tx_hash.to_string(),
                amount: BigDecimal::from_str(amount).unwrap(),
                currency,
                status: WithdrawalStatus::Pending,
                from_address: from_address.to_string(),
                to_address: to_address.to_string(),
                chain_position: None,
                created_at: Utc::now(),
                confirmed_at: None,
            });
        }

        pub fn add_pending_deposit(
            &self,
            user_id: i64,
            tx_hash: &str,
            currency: Currency,
            amount: &str,
            to_address: &str,
        ) {
            let mut state = self.inner.lock().unwrap();
            let id = state.next_id();
            state.deposits.push(Deposit {
                id,
                user_id,
                tx_hash: tx_hash.to_string(),
                amount: BigDecimal::from_str(amount).unwrap(),
                currency,
                status: DepositStatus::Pending,
                to_address: to_address.to_string(),
                chain_position: None,
                created_at: Utc::now(),
                confirmed_at: None,
            });
        }

        pub fn balance(&self, user_id: i64, currency: Currency) -> BigDecimal {
            self.inner
                .lock()
                .unwrap()
                .balances
                .get(&(user_id, currency))
                .cloned()
                .unwrap_or_else(|| BigDecimal::from(0))
        }

        pub fn deposits(&self) -> Vec<Deposit> {
            self.inner.lock().unwrap().deposits.clone()
        }

        pub fn withdrawals(&self) -> Vec<Withdrawal> {
            self.inner.lock().unwrap().withdrawals.clone()
        }
    }

    #[async_trait]
    impl Ledger for MemLedger {
        async fn deposit_accounts(&self, currency: Currency) -> Result<Vec<DepositAccount>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .accounts
                .get(&currency)
                .cloned()
                .unwrap_or_default())
        }

        async fn insert_confirmed_deposit(&self, deposit: &NewDeposit) -> Result<bool> {
            let mut state = self.inner.lock().unwrap();
            let duplicate = state
                .deposits
                .iter()
                .any(|d| d.tx_hash == deposit.tx_hash && d.currency == deposit.currency);
            if duplicate {
                return Ok(false);
            }

            let id = state.next_id();
            state.deposits.push(Deposit {
                id,
                user_id: deposit.user_id,
                tx_hash: deposit.tx_hash.clone(),
                amount: deposit.amount.clone(),
                currency: deposit.currency,
                status: DepositStatus::Confirmed,
                to_address: deposit.to_address.clone(),
                chain_position: Some(deposit.chain_position),
                created_at: Utc::now(),
                confirmed_at: Some(Utc::now()),
            });
            Ok(true)
        }

        async fn adjust_balance(
            &self,
            user_id: i64,
            currency: Currency,
            delta: &BigDecimal,
        ) -> Result<()> {
            let mut state = self.inner.lock().unwrap();
            let balance = state
                .balances
                .entry((user_id, currency))
                .or_insert_with(|| BigDecimal::from(0));
            *balance += delta.clone();
            Ok(())
        }

        async fn find_withdrawal(
            &self,
            tx_hash: &str,
            currency: Currency,
        ) -> Result<Option<Withdrawal>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .withdrawals
                .iter()
                .find(|w| w.tx_hash == tx_hash && w.currency == currency)
                .cloned())
        }

        async fn confirm_withdrawal(
            &self,
            tx_hash: &str,
            currency: Currency,
            chain_position: i64,
        ) -> Result<bool> {
            let mut state = self.inner.lock().unwrap();
            match state.withdrawals.iter_mut().find(|w| {
                w.tx_hash == tx_hash
                    && w.currency == currency
                    && w.status == WithdrawalStatus::Pending
            }) {
                Some(withdrawal) => {
                    withdrawal.status = WithdrawalStatus::Confirmed;
                    withdrawal.confirmed_at = Some(Utc::now());
                    withdrawal.chain_position = Some(chain_position);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn fail_withdrawal(&self, tx_hash: &str, currency: Currency) -> Result<bool> {
            let mut state = self.inner.lock().unwrap();
            match state.withdrawals.iter_mut().find(|w| {
                w.tx_hash == tx_hash
                    && w.currency == currency
                    && w.status == WithdrawalStatus::Pending
            }) {
                Some(withdrawal) => {
                    withdrawal.status = WithdrawalStatus::Failed;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn insert_unauthorized_withdrawal(
            &self,
            withdrawal: &NewUnauthorizedWithdrawal,
        ) -> Result<bool> {
            let mut state = self.inner.lock().unwrap();
            let duplicate = state
                .withdrawals
                .iter()
                .any(|w| w.tx_hash == withdrawal.tx_hash && w.currency == withdrawal.currency);
            if duplicate {
                return Ok(false);
            }

            let id = state.next_id();
            state.withdrawals.push(Withdrawal {
                id,
                user_id: withdrawal.user_id,
                tx_hash: withdrawal.tx_hash.clone(),
                amount: withdrawal.amount.clone(),
                currency: withdrawal.currency,
                status: WithdrawalStatus::Unauthorized,
                from_address: withdrawal.from_address.clone(),
                to_address: withdrawal.to_address.clone(),
                chain_position: Some(withdrawal.chain_position),
                created_at: Utc::now(),
                confirmed_at: None,
            });
            Ok(true)
        }

        async fn pending_deposits(&self, currency: Currency) -> Result<Vec<Deposit>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .deposits
                .iter()
                .filter(|d| d.currency == currency && d.status == DepositStatus::Pending)
                .cloned()
                .collect())
        }

        async fn pending_withdrawals(&self, currency: Currency) -> Result<Vec<Withdrawal>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .withdrawals
                .iter()
                .filter(|w| w.currency == currency && w.status == WithdrawalStatus::Pending)
                .cloned()
                .collect())
        }

        async fn confirm_deposit(
            &self,
            tx_hash: &str,
            currency: Currency,
            chain_position: i64,
        ) -> Result<bool> {
            let mut state = self.inner.lock().unwrap();
            match state.deposits.iter_mut().find(|d| {
                d.tx_hash == tx_hash
                    && d.currency == currency
                    && d.status == DepositStatus::Pending
            }) {
                Some(deposit) => {
                    deposit.status = DepositStatus::Confirmed;
                    deposit.confirmed_at = Some(Utc::now());
                    deposit.chain_position = Some(chain_position);
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    /// Scripted chain: a settable tip, per-position blocks (or scripted
    /// failures), per-transaction amounts and lookup outcomes.
    pub struct MockChain {
        currency: Currency,
        tip: Mutex<u64>,
        tip_unreachable: Mutex<bool>,
        blocks: Mutex<HashMap<u64, Result<Vec<BlockTransfer>, String>>>,
        amounts: Mutex<HashMap<String, BigDecimal>>,
        lookups: Mutex<HashMap<String, TxLookup>>,
    }

    impl MockChain {
        pub fn new(currency: Currency, tip: u64) -> Self {
            Self {
                currency,
                tip: Mutex::new(tip),
                tip_unreachable: Mutex::new(false),
                blocks: Mutex::new(HashMap::new()),
                amounts: Mutex::new(HashMap::new()),
                lookups: Mutex::new(HashMap::new()),
            }
        }

        pub fn set_tip(&self, tip: u64) {
            *self.tip.lock().unwrap() = tip;
        }

        pub fn fail_tip(&self, unreachable: bool) {
            *self.tip_unreachable.lock().unwrap() = unreachable;
        }

        pub fn set_block(&self, position: u64, transfers: Vec<BlockTransfer>) {
            self.blocks.lock().unwrap().insert(position, Ok(transfers));
        }

        pub fn fail_block(&self, position: u64, reason: &str) {
            self.blocks
                .lock()
                .unwrap()
                .insert(position, Err(reason.to_string()));
        }

        pub fn set_amount(&self, tx_id: &str, amount: &str) {
            self.amounts.lock().unwrap().insert(
                tx_id.to_string(),
                BigDecimal::from_str(amount).unwrap(),
            );
        }

        pub fn set_lookup(&self, tx_id: &str, lookup: TxLookup) {
            self.lookups.lock().unwrap().insert(tx_id.to_string(), lookup);
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        fn currency(&self) -> Currency {
            self.currency
        }

        fn canonical(&self, address: &str) -> String {
            match self.currency {
                Currency::Eth => address.trim().to_ascii_lowercase(),
                Currency::Sol => address.trim().to_string(),
            }
        }

        async fn tip(&self) -> Result<u64, ChainError> {
            if *self.tip_unreachable.lock().unwrap() {
                return Err(ChainError::Transport("rpc timeout".to_string()));
            }
            Ok(*self.tip.lock().unwrap())
        }

        async fn block_transfers(&self, position: u64) -> Result<Vec<BlockTransfer>, ChainError> {
            match self.blocks.lock().unwrap().get(&position) {
                Some(Ok(transfers)) => Ok(transfers.clone()),
                Some(Err(reason)) => Err(ChainError::Transport(reason.clone())),
                None => Ok(Vec::new()),
            }
        }

        async fn transfer_amount(&self, tx_id: &str) -> Result<Option<BigDecimal>, ChainError> {
            Ok(self.amounts.lock().unwrap().get(tx_id).cloned())
        }

        async fn lookup_transfer(&self, tx_id: &str) -> Result<TxLookup, ChainError> {
            Ok(self
                .lookups
                .lock()
                .unwrap()
                .get(tx_id)
                .cloned()
                .unwrap_or(TxLookup::NotFound))
        }
    }
}

fn transfer(tx_id: &str, from: &str, to: &str, amount: Option<&str>) -> BlockTransfer {
    BlockTransfer {
        tx_id: tx_id.to_string(),
        from: Some(from.to_string()),
        to: Some(to.to_string()),
        amount: amount.map(|a| BigDecimal::from_str(a).unwrap()),
    }
}

async fn scanner_at(
    chain: &Arc<MockChain>,
    ledger: &MemLedger,
) -> Scanner<MemLedger> {
    Scanner::start_at_tip(
        chain.clone() as Arc<dyn ChainClient>,
        ledger.clone(),
        Duration::from_millis(10),
    )
    .await
    .expect("tip is scripted")
}

// ============================================================================
// Deposit path
// ============================================================================

#[tokio::test]
async fn test_deposit_credited_exactly_once_on_replay() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xABC", "0");

    let chain = Arc::new(MockChain::new(Currency::Eth, 100));
    let mut scanner = scanner_at(&chain, &ledger).await;

    // 1.5 ETH to the custodial address; the amount comes from the
    // follow-up transaction fetch, as on a real EVM chain.
    chain.set_block(101, vec![transfer("h1", "0xdead", "0xabc", None)]);
    chain.set_amount("h1", "1.5");
    chain.set_tip(101);

    scanner.advance().await;
    assert_eq!(scanner.watermark(), 101);

    let deposits = ledger.deposits();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].tx_hash, "h1");
    assert_eq!(deposits[0].status, DepositStatus::Confirmed);
    assert_eq!(deposits[0].chain_position, Some(101));
    assert_eq!(
        ledger.balance(1, Currency::Eth),
        BigDecimal::from_str("1.5").unwrap()
    );

    // Crash before the watermark advanced: a fresh scanner replays the
    // same height. The unique insert makes it a no-op.
    chain.set_tip(100);
    let mut replay = scanner_at(&chain, &ledger).await;
    chain.set_tip(101);
    replay.advance().await;

    assert_eq!(ledger.deposits().len(), 1);
    assert_eq!(
        ledger.balance(1, Currency::Eth),
        BigDecimal::from_str("1.5").unwrap()
    );
}

#[tokio::test]
async fn test_deposit_address_matching_is_case_normalized() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xAbCd", "0");

    let chain = Arc::new(MockChain::new(Currency::Eth, 10));
    let mut scanner = scanner_at(&chain, &ledger).await;

    chain.set_block(11, vec![transfer("h1", "0xdead", "0xABCD", Some("0.25"))]);
    chain.set_tip(11);
    scanner.advance().await;

    assert_eq!(ledger.deposits().len(), 1);
    assert_eq!(
        ledger.balance(1, Currency::Eth),
        BigDecimal::from_str("0.25").unwrap()
    );
}

#[tokio::test]
async fn test_zero_value_transfers_are_ignored() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xabc", "0");

    let chain = Arc::new(MockChain::new(Currency::Eth, 10));
    let mut scanner = scanner_at(&chain, &ledger).await;

    // Zero known up front, and zero discovered by the detail fetch.
    chain.set_block(
        11,
        vec![
            transfer("h1", "0xdead", "0xabc", Some("0")),
            transfer("h2", "0xdead", "0xabc", None),
        ],
    );
    chain.set_amount("h2", "0");
    chain.set_tip(11);
    scanner.advance().await;

    assert!(ledger.deposits().is_empty());
    assert_eq!(ledger.balance(1, Currency::Eth), BigDecimal::from(0));
}

// ============================================================================
// Watermark behavior
// ============================================================================

#[tokio::test]
async fn test_scanner_halts_at_failing_height_then_retries() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Sol, "CustodialKey", "0");

    let chain = Arc::new(MockChain::new(Currency::Sol, 100));
    let mut scanner = scanner_at(&chain, &ledger).await;

    // Tip 105 with a deposit at 104 behind a failing 103: the scanner must
    // stop at 102 and must not skip ahead to the deposit.
    chain.set_block(101, vec![]);
    chain.set_block(102, vec![]);
    chain.fail_block(103, "rpc timeout");
    chain.set_block(
        104,
        vec![transfer("sig1", "Sender", "CustodialKey", Some("3"))],
    );
    chain.set_block(105, vec![]);
    chain.set_tip(105);

    scanner.advance().await;
    assert_eq!(scanner.watermark(), 102);
    assert!(ledger.deposits().is_empty());

    // Endpoint recovers; the next cycle resumes from 103.
    chain.set_block(103, vec![]);
    scanner.advance().await;
    assert_eq!(scanner.watermark(), 105);

    let deposits = ledger.deposits();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].chain_position, Some(104));
    assert_eq!(ledger.balance(1, Currency::Sol), BigDecimal::from(3));
}

#[tokio::test]
async fn test_watermark_never_decreases() {
    let ledger = MemLedger::new();
    let chain = Arc::new(MockChain::new(Currency::Eth, 50));
    let mut scanner = scanner_at(&chain, &ledger).await;

    // A stale tip below the watermark must not move it backwards.
    chain.set_tip(40);
    scanner.advance().await;
    assert_eq!(scanner.watermark(), 50);
}

#[tokio::test]
async fn test_unreachable_tip_is_retried_next_cycle() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xabc", "0");

    let chain = Arc::new(MockChain::new(Currency::Eth, 50));
    let mut scanner = scanner_at(&chain, &ledger).await;

    chain.set_block(51, vec![transfer("h1", "0xdead", "0xabc", Some("1"))]);
    chain.set_tip(51);
    chain.fail_tip(true);
    scanner.advance().await;
    assert_eq!(scanner.watermark(), 50);
    assert!(ledger.deposits().is_empty());

    chain.fail_tip(false);
    scanner.advance().await;
    assert_eq!(scanner.watermark(), 51);
    assert_eq!(ledger.deposits().len(), 1);
}

// ============================================================================
// Withdrawal path
// ============================================================================

#[tokio::test]
async fn test_expected_withdrawal_confirms_and_debits_once() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xabc", "5");
    ledger.add_pending_withdrawal(1, "h2", Currency::Eth, "2", "0xabc", "0xdead");

    let chain = Arc::new(MockChain::new(Currency::Eth, 100));
    let mut scanner = scanner_at(&chain, &ledger).await;

    chain.set_block(101, vec![transfer("h2", "0xABC", "0xdead", None)]);
    chain.set_amount("h2", "2");
    chain.set_tip(101);
    scanner.advance().await;

    let withdrawals = ledger.withdrawals();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].status, WithdrawalStatus::Confirmed);
    assert_eq!(withdrawals[0].chain_position, Some(101));
    assert_eq!(ledger.balance(1, Currency::Eth), BigDecimal::from(3));

    // Observed again in a replayed cycle: already confirmed, no second
    // debit.
    chain.set_tip(100);
    let mut replay = scanner_at(&chain, &ledger).await;
    chain.set_tip(101);
    replay.advance().await;

    assert_eq!(ledger.withdrawals().len(), 1);
    assert_eq!(ledger.balance(1, Currency::Eth), BigDecimal::from(3));
}

#[tokio::test]
async fn test_unauthorized_withdrawal_recorded_never_debited() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Sol, "CustodialKey", "10");

    let chain = Arc::new(MockChain::new(Currency::Sol, 200));
    let mut scanner = scanner_at(&chain, &ledger).await;

    chain.set_block(
        201,
        vec![transfer("sig9", "CustodialKey", "AttackerKey", Some("4"))],
    );
    chain.set_tip(201);
    scanner.advance().await;

    let withdrawals = ledger.withdrawals();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].status, WithdrawalStatus::Unauthorized);
    assert_eq!(withdrawals[0].from_address, "CustodialKey");
    assert_eq!(withdrawals[0].to_address, "AttackerKey");
    assert_eq!(withdrawals[0].amount, BigDecimal::from(4));
    // Anomaly creation never touches the balance.
    assert_eq!(ledger.balance(1, Currency::Sol), BigDecimal::from(10));

    // Replaying the block does not record the anomaly twice.
    chain.set_tip(200);
    let mut replay = scanner_at(&chain, &ledger).await;
    chain.set_tip(201);
    replay.advance().await;

    assert_eq!(ledger.withdrawals().len(), 1);
    assert_eq!(ledger.balance(1, Currency::Sol), BigDecimal::from(10));
}

#[tokio::test]
async fn test_transfer_between_custodial_addresses_hits_both_paths() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xaaa", "5");
    ledger.add_user(2, Currency::Eth, "0xbbb", "0");
    ledger.add_pending_withdrawal(1, "h7", Currency::Eth, "1", "0xaaa", "0xbbb");

    let chain = Arc::new(MockChain::new(Currency::Eth, 300));
    let mut scanner = scanner_at(&chain, &ledger).await;

    chain.set_block(301, vec![transfer("h7", "0xaaa", "0xbbb", Some("1"))]);
    chain.set_tip(301);
    scanner.advance().await;

    // Sender side: pending withdrawal confirmed and debited.
    assert_eq!(ledger.balance(1, Currency::Eth), BigDecimal::from(4));
    assert_eq!(
        ledger.withdrawals()[0].status,
        WithdrawalStatus::Confirmed
    );
    // Recipient side: deposit credited.
    assert_eq!(ledger.balance(2, Currency::Eth), BigDecimal::from(1));
    assert_eq!(ledger.deposits().len(), 1);
}

// ============================================================================
// Pending reconciliation
// ============================================================================

#[tokio::test]
async fn test_reconciler_fails_unfindable_withdrawal_without_debit() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xabc", "5");
    ledger.add_pending_withdrawal(1, "h4", Currency::Eth, "2", "0xabc", "0xdead");

    let chain = Arc::new(MockChain::new(Currency::Eth, 100));
    // No lookup scripted for h4: the chain does not know the transaction.
    let reconciler = Reconciler::new(
        chain as Arc<dyn ChainClient>,
        ledger.clone(),
        Duration::from_secs(30),
    );

    reconciler.sweep().await.unwrap();

    let withdrawals = ledger.withdrawals();
    assert_eq!(withdrawals[0].status, WithdrawalStatus::Failed);
    assert_eq!(ledger.balance(1, Currency::Eth), BigDecimal::from(5));
}

#[tokio::test]
async fn test_reconciler_confirms_found_withdrawal_and_debits_once() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Sol, "CustodialKey", "9");
    ledger.add_pending_withdrawal(1, "sig4", Currency::Sol, "2", "CustodialKey", "OtherKey");

    let chain = Arc::new(MockChain::new(Currency::Sol, 100));
    chain.set_lookup("sig4", TxLookup::Finalized(4242));
    let reconciler = Reconciler::new(
        chain as Arc<dyn ChainClient>,
        ledger.clone(),
        Duration::from_secs(300),
    );

    reconciler.sweep().await.unwrap();

    let withdrawals = ledger.withdrawals();
    assert_eq!(withdrawals[0].status, WithdrawalStatus::Confirmed);
    assert_eq!(withdrawals[0].chain_position, Some(4242));
    assert_eq!(ledger.balance(1, Currency::Sol), BigDecimal::from(7));

    // Repeat sweep: nothing pending, no second debit.
    reconciler.sweep().await.unwrap();
    assert_eq!(ledger.balance(1, Currency::Sol), BigDecimal::from(7));
}

#[tokio::test]
async fn test_reconciler_leaves_unmined_withdrawal_pending() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xabc", "5");
    ledger.add_pending_withdrawal(1, "h5", Currency::Eth, "1", "0xabc", "0xdead");

    let chain = Arc::new(MockChain::new(Currency::Eth, 100));
    chain.set_lookup("h5", TxLookup::Pending);
    let reconciler = Reconciler::new(
        chain as Arc<dyn ChainClient>,
        ledger.clone(),
        Duration::from_secs(30),
    );

    reconciler.sweep().await.unwrap();

    assert_eq!(ledger.withdrawals()[0].status, WithdrawalStatus::Pending);
    assert_eq!(ledger.balance(1, Currency::Eth), BigDecimal::from(5));
}

#[tokio::test]
async fn test_reconciler_confirms_pending_deposit_without_credit() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xabc", "3");
    // Credited when the row was created, outside the watcher.
    ledger.add_pending_deposit(1, "h6", Currency::Eth, "3", "0xabc");

    let chain = Arc::new(MockChain::new(Currency::Eth, 100));
    chain.set_lookup("h6", TxLookup::Finalized(90));
    let reconciler = Reconciler::new(
        chain as Arc<dyn ChainClient>,
        ledger.clone(),
        Duration::from_secs(30),
    );

    reconciler.sweep().await.unwrap();

    let deposits = ledger.deposits();
    assert_eq!(deposits[0].status, DepositStatus::Confirmed);
    assert_eq!(deposits[0].chain_position, Some(90));
    assert_eq!(ledger.balance(1, Currency::Eth), BigDecimal::from(3));

    // An unfindable pending deposit stays pending; deposits never fail.
    ledger.add_pending_deposit(1, "h8", Currency::Eth, "1", "0xabc");
    reconciler.sweep().await.unwrap();
    let deposits = ledger.deposits();
    let stuck = deposits.iter().find(|d| d.tx_hash == "h8").unwrap();
    assert_eq!(stuck.status, DepositStatus::Pending);
}

#[tokio::test]
async fn test_live_scan_and_reconciler_overlap_debits_once() {
    let ledger = MemLedger::new();
    ledger.add_user(1, Currency::Eth, "0xabc", "10");
    ledger.add_pending_withdrawal(1, "h9", Currency::Eth, "4", "0xabc", "0xdead");

    let chain = Arc::new(MockChain::new(Currency::Eth, 100));
    chain.set_block(101, vec![transfer("h9", "0xabc", "0xdead", Some("4"))]);
    chain.set_lookup("h9", TxLookup::Finalized(101));

    let mut scanner = scanner_at(&chain, &ledger).await;
    let reconciler = Reconciler::new(
        chain.clone() as Arc<dyn ChainClient>,
        ledger.clone(),
        Duration::from_secs(30),
    );

    chain.set_tip(101);
    scanner.advance().await;
    reconciler.sweep().await.unwrap();

    // Whichever path won the guarded transition performed the only debit.
    assert_eq!(ledger.withdrawals()[0].status, WithdrawalStatus::Confirmed);
    assert_eq!(ledger.balance(1, Currency::Eth), BigDecimal::from(6));
}

// ============================================================================
// Environment test (requires running infrastructure)
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_environment_setup() {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let evm_rpc_url = std::env::var("EVM_RPC_URL").expect("EVM_RPC_URL required");
    let solana_rpc_url = std::env::var("SOLANA_RPC_URL").expect("SOLANA_RPC_URL required");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");
    custody_watcher::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    println!("Database OK");

    let evm = custody_watcher::chain::EvmClient::new(&evm_rpc_url).unwrap();
    let tip = evm.tip().await.expect("Failed to read EVM tip");
    println!("EVM RPC OK, tip {}", tip);

    let solana = custody_watcher::chain::SolanaClient::new(&solana_rpc_url).unwrap();
    let slot = solana.tip().await.expect("Failed to read Solana slot");
    println!("Solana RPC OK, slot {}", slot);
}

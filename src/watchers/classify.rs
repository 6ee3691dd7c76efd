//! Partition a block's transfers against the custodial address set.

use bigdecimal::BigDecimal;
use std::collections::HashMap;

use crate::chain::BlockTransfer;
use crate::db::DepositAccount;

/// Snapshot of the custodial deposit addresses for one chain, keyed by
/// canonical form. Rebuilt once per processed height so newly registered
/// users are matched within one scan cycle.
pub struct AddressIndex {
    accounts: HashMap<String, DepositAccount>,
}

impl AddressIndex {
    pub fn new(accounts: Vec<DepositAccount>, canonical: impl Fn(&str) -> String) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (canonical(&account.address), account))
            .collect();
        Self { accounts }
    }

    pub fn lookup(&self, canonical_address: &str) -> Option<&DepositAccount> {
        self.accounts.get(canonical_address)
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// A transfer that touched a custodial address, paired with the owning
/// account.
pub struct Candidate<'a> {
    pub account: &'a DepositAccount,
    pub transfer: &'a BlockTransfer,
}

/// The two candidate sets for one height. A single transfer appears in
/// both when it moves value between two custodial addresses.
pub struct Classified<'a> {
    pub deposits: Vec<Candidate<'a>>,
    pub withdrawals: Vec<Candidate<'a>>,
}

/// Match each transfer's endpoints against the index.
///
/// Transfers with fewer than two participants, or with a known
/// zero-or-negative amount, are dropped silently — most chain traffic is
/// unrelated contract calls, not an error condition. Amounts still
/// unresolved at this point (`None`) pass through; the scanner drops them
/// after resolution if they turn out to move no value.
pub fn classify<'a>(
    transfers: &'a [BlockTransfer],
    index: &'a AddressIndex,
    canonical: impl Fn(&str) -> String,
) -> Classified<'a> {
    let zero = BigDecimal::from(0);
    let mut deposits = Vec::new();
    let mut withdrawals = Vec::new();

    for transfer in transfers {
        let (Some(from), Some(to)) = (&transfer.from, &transfer.to) else {
            continue;
        };
        if let Some(amount) = &transfer.amount {
            if *amount <= zero {
                continue;
            }
        }

        if let Some(account) = index.lookup(&canonical(to)) {
            deposits.push(Candidate { account, transfer });
        }
        if let Some(account) = index.lookup(&canonical(from)) {
            withdrawals.push(Candidate { account, transfer });
        }
    }

    Classified {
        deposits,
        withdrawals,
    }
}

//! In-process Bitcoin and Monero chains for running whole swaps.
//!
//! `SimChain` enforces what the swap relies on from a node: no double
//! spends, BIP68 relative height locks and confirmation depths, plus
//! scripted reorgs. `SimMonero` tracks transfers, confirmations and sweeps.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{SecretKey, SECP256K1};
use bitcoin::{
    absolute::LockTime, relative, transaction::Version, Address, Amount, Network, OutPoint,
    ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use caravel_bitcoin::{BitcoinError, BitcoinWallet, TxStatus};
use caravel_monero::{
    JointAccount, MoneroError, MoneroWallet, TransferCheck, TransferProof, TxHash, XmrAmount,
};
use curve25519_dalek::scalar::Scalar;
use protocol::{
    AliceContext, BobContext, FixedRateOracle, QuotePolicy, Rate, SwapChannel, SwapConfig, SwapId,
    SwapStore,
};
use rand::Rng;
use tokio::task::JoinHandle;

pub const START_HEIGHT: u32 = 100;
pub const BLOCK_TIME: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn random_hex() -> String {
    let mut rng = rand::thread_rng();
    format!("{:032x}{:032x}", rng.gen::<u128>(), rng.gen::<u128>())
}

struct ScheduledReorg {
    txid: Txid,
    at_depth: u32,
    blocks: u32,
}

#[derive(Default)]
struct ChainState {
    height: u32,
    /// Transactions with the height they were mined at, `None` in mempool.
    txs: HashMap<Txid, (Transaction, Option<u32>)>,
    spent: HashMap<OutPoint, Txid>,
    external: HashSet<OutPoint>,
    scheduled: Option<ScheduledReorg>,
    reorgs: usize,
}

impl ChainState {
    fn depth(&self, txid: &Txid) -> Option<u32> {
        match self.txs.get(txid) {
            Some((_, Some(mined))) => Some(self.height - mined + 1),
            _ => None,
        }
    }

    fn reorg(&mut self, blocks: u32) {
        let new_height = self.height - blocks;
        for (_, mined) in self.txs.values_mut() {
            if matches!(mined, Some(h) if *h > new_height) {
                *mined = None;
            }
        }
        self.height = new_height;
        self.reorgs += 1;
    }
}

#[derive(Clone)]
pub struct SimChain {
    state: Arc<Mutex<ChainState>>,
}

impl SimChain {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                height: START_HEIGHT,
                ..ChainState::default()
            })),
        }
    }

    pub fn height(&self) -> u32 {
        lock(&self.state).height
    }

    pub fn mine(&self) {
        let mut state = lock(&self.state);
        state.height += 1;
        let height = state.height;
        for (_, mined) in state.txs.values_mut() {
            mined.get_or_insert(height);
        }
        let due = state
            .scheduled
            .as_ref()
            .is_some_and(|r| state.depth(&r.txid).is_some_and(|d| d >= r.at_depth));
        if due {
            if let Some(reorg) = state.scheduled.take() {
                state.reorg(reorg.blocks);
            }
        }
    }

    /// Orphans the last `blocks` blocks once `txid` is `at_depth` deep.
    pub fn schedule_reorg(&self, txid: Txid, at_depth: u32, blocks: u32) {
        lock(&self.state).scheduled = Some(ScheduledReorg {
            txid,
            at_depth,
            blocks,
        });
    }

    pub fn reorgs(&self) -> usize {
        lock(&self.state).reorgs
    }

    pub fn mined_at(&self, txid: Txid) -> Option<u32> {
        lock(&self.state).txs.get(&txid).and_then(|(_, mined)| *mined)
    }

    pub fn status(&self, txid: Txid) -> TxStatus {
        let state = lock(&self.state);
        match state.txs.get(&txid) {
            None => TxStatus::Unseen,
            Some((_, None)) => TxStatus::InMempool,
            Some((_, Some(mined))) => TxStatus::Confirmed {
                depth: state.height - mined + 1,
            },
        }
    }

    pub fn transaction(&self, txid: Txid) -> Option<Transaction> {
        lock(&self.state).txs.get(&txid).map(|(tx, _)| tx.clone())
    }

    /// Total paid to `script` by mined transactions.
    pub fn received(&self, script: &ScriptBuf) -> Amount {
        lock(&self.state)
            .txs
            .values()
            .filter(|(_, mined)| mined.is_some())
            .flat_map(|(tx, _)| tx.output.iter())
            .filter(|out| out.script_pubkey == *script)
            .map(|out| out.value)
            .sum()
    }

    /// A spendable outpoint from outside the simulated chain.
    fn fund(&self) -> OutPoint {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        let outpoint = OutPoint::new(Txid::from_byte_array(bytes), 0);
        lock(&self.state).external.insert(outpoint);
        outpoint
    }

    fn submit(&self, tx: &Transaction) -> Result<Txid, BitcoinError> {
        let txid = tx.compute_txid();
        let mut state = lock(&self.state);
        if state.txs.contains_key(&txid) {
            return Ok(txid);
        }
        for input in &tx.input {
            let outpoint = input.previous_output;
            if state.spent.contains_key(&outpoint) {
                return Err(BitcoinError::Esplora(
                    "bad-txns-inputs-missingorspent".into(),
                ));
            }
            if state.external.contains(&outpoint) {
                continue;
            }
            let Some((prev, _)) = state.txs.get(&outpoint.txid) else {
                return Err(BitcoinError::Esplora(
                    "bad-txns-inputs-missingorspent".into(),
                ));
            };
            if prev.output.len() <= outpoint.vout as usize {
                return Err(BitcoinError::Esplora("bad-txns-inputs-missingorspent".into()));
            }
            if let Some(relative::LockTime::Blocks(blocks)) = input.sequence.to_relative_lock_time()
            {
                let depth = state.depth(&outpoint.txid).unwrap_or(0);
                if depth < u32::from(blocks.value()) {
                    return Err(BitcoinError::Esplora("non-BIP68-final".into()));
                }
            }
        }
        for input in &tx.input {
            state.spent.insert(input.previous_output, txid);
        }
        state.txs.insert(txid, (tx.clone(), None));
        Ok(txid)
    }
}

pub struct SimBitcoinWallet {
    chain: SimChain,
    address: Address,
    reserved: Mutex<HashSet<OutPoint>>,
}

impl SimBitcoinWallet {
    pub fn new(chain: SimChain) -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        let (x_only, _) = secret.public_key(SECP256K1).x_only_public_key();
        Self {
            chain,
            address: Address::p2tr(SECP256K1, x_only, None, Network::Regtest),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    /// Inputs handed out by `build_tx` and neither published nor released.
    pub fn reserved(&self) -> usize {
        lock(&self.reserved).len()
    }

    fn unreserve(&self, tx: &Transaction) {
        let mut reserved = lock(&self.reserved);
        for input in &tx.input {
            reserved.remove(&input.previous_output);
        }
    }
}

#[async_trait]
impl BitcoinWallet for SimBitcoinWallet {
    async fn build_tx(
        &self,
        script_pubkey: ScriptBuf,
        amount: Amount,
    ) -> caravel_bitcoin::Result<Transaction> {
        let funding = self.chain.fund();
        lock(&self.reserved).insert(funding);
        Ok(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: funding,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: Amount::from_sat(50_000),
                    script_pubkey: self.script_pubkey(),
                },
                TxOut {
                    value: amount,
                    script_pubkey,
                },
            ],
        })
    }

    async fn release(&self, tx: &Transaction) {
        self.unreserve(tx);
    }

    async fn sign(&self, mut tx: Transaction) -> caravel_bitcoin::Result<Transaction> {
        for input in &mut tx.input {
            input.witness = Witness::from_slice(&[[1u8; 64]]);
        }
        Ok(tx)
    }

    async fn broadcast(&self, tx: &Transaction) -> caravel_bitcoin::Result<Txid> {
        let txid = self.chain.submit(tx)?;
        self.unreserve(tx);
        Ok(txid)
    }

    async fn get_confirmations(&self, txid: Txid) -> caravel_bitcoin::Result<TxStatus> {
        Ok(self.chain.status(txid))
    }

    async fn current_height(&self) -> caravel_bitcoin::Result<u32> {
        Ok(self.chain.height())
    }

    async fn get_transaction(&self, txid: Txid) -> caravel_bitcoin::Result<Option<Transaction>> {
        Ok(self.chain.transaction(txid))
    }

    async fn new_address(&self) -> caravel_bitcoin::Result<Address> {
        Ok(self.address.clone())
    }
}

struct Transfer {
    hash: TxHash,
    key: String,
    from: String,
    to: monero::Address,
    amount: XmrAmount,
    mined: Option<u64>,
    swept: bool,
}

#[derive(Clone, Debug)]
pub struct Sweep {
    pub wallet: String,
    pub from: monero::Address,
    pub amount: XmrAmount,
    /// Bitcoin height when the sweep was made.
    pub bitcoin_height: u32,
}

#[derive(Default)]
struct LedgerState {
    height: u64,
    transfers: Vec<Transfer>,
    balances: HashMap<String, XmrAmount>,
    sweeps: Vec<Sweep>,
}

#[derive(Clone)]
pub struct SimMonero {
    state: Arc<Mutex<LedgerState>>,
    bitcoin: SimChain,
}

impl SimMonero {
    pub fn new(bitcoin: SimChain) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                height: 2_000,
                ..LedgerState::default()
            })),
            bitcoin,
        }
    }

    pub fn mine(&self) {
        let mut state = lock(&self.state);
        state.height += 1;
        let height = state.height;
        for transfer in &mut state.transfers {
            transfer.mined.get_or_insert(height);
        }
    }

    pub fn wallet(&self, name: &str, balance: XmrAmount) -> SimMoneroWallet {
        lock(&self.state).balances.insert(name.to_string(), balance);
        SimMoneroWallet {
            name: name.to_string(),
            ledger: self.clone(),
            main_address: random_address(),
            opened: Mutex::new(None),
        }
    }

    pub fn balance(&self, name: &str) -> XmrAmount {
        lock(&self.state)
            .balances
            .get(name)
            .copied()
            .unwrap_or(XmrAmount::ZERO)
    }

    pub fn sweeps(&self) -> Vec<Sweep> {
        lock(&self.state).sweeps.clone()
    }

    pub fn transfers_to(&self, address: &monero::Address) -> usize {
        lock(&self.state)
            .transfers
            .iter()
            .filter(|t| t.to == *address)
            .count()
    }
}

fn random_key() -> monero::PrivateKey {
    let scalar = Scalar::random(&mut rand::thread_rng());
    monero::PrivateKey::from_slice(scalar.as_bytes()).expect("canonical scalar")
}

fn random_address() -> monero::Address {
    let spend = monero::PublicKey::from_private_key(&random_key());
    let view = monero::PublicKey::from_private_key(&random_key());
    monero::Address::standard(monero::Network::Stagenet, spend, view)
}

pub struct SimMoneroWallet {
    name: String,
    ledger: SimMonero,
    main_address: monero::Address,
    opened: Mutex<Option<JointAccount>>,
}

#[async_trait]
impl MoneroWallet for SimMoneroWallet {
    async fn create_account_from_key(&self, account: &JointAccount) -> caravel_monero::Result<()> {
        let spend = monero::PublicKey::from_private_key(&account.spend_key);
        let view = monero::PublicKey::from_private_key(&account.view_key);
        if spend != account.address.public_spend || view != account.address.public_view {
            return Err(MoneroError::Key("keys do not match the address".into()));
        }
        *lock(&self.opened) = Some(account.clone());
        Ok(())
    }

    async fn transfer(
        &self,
        address: &monero::Address,
        amount: XmrAmount,
    ) -> caravel_monero::Result<TransferProof> {
        let mut state = lock(&self.ledger.state);
        let available = state
            .balances
            .get(&self.name)
            .copied()
            .unwrap_or(XmrAmount::ZERO);
        let remaining = available
            .checked_sub(amount)
            .ok_or(MoneroError::InsufficientFunds {
                needed: amount,
                available,
            })?;
        state.balances.insert(self.name.clone(), remaining);
        let proof = TransferProof {
            tx_hash: TxHash(random_hex()),
            tx_key: random_hex(),
        };
        state.transfers.push(Transfer {
            hash: proof.tx_hash.clone(),
            key: proof.tx_key.clone(),
            from: self.name.clone(),
            to: *address,
            amount,
            mined: None,
            swept: false,
        });
        Ok(proof)
    }

    async fn sweep_all(&self, address: &monero::Address) -> caravel_monero::Result<Vec<TxHash>> {
        let account = lock(&self.opened)
            .take()
            .ok_or_else(|| MoneroError::Rpc("no wallet open".into()))?;
        if *address != self.main_address {
            return Err(MoneroError::Rpc("unknown sweep destination".into()));
        }
        let bitcoin_height = self.ledger.bitcoin.height();
        let mut state = lock(&self.ledger.state);
        let mut amount = XmrAmount::ZERO;
        for transfer in &mut state.transfers {
            if transfer.to == account.address && transfer.mined.is_some() && !transfer.swept {
                transfer.swept = true;
                amount = amount + transfer.amount;
            }
        }
        if amount == XmrAmount::ZERO {
            return Err(MoneroError::Rpc("no unlocked balance".into()));
        }
        let balance = state
            .balances
            .get(&self.name)
            .copied()
            .unwrap_or(XmrAmount::ZERO);
        state.balances.insert(self.name.clone(), balance + amount);
        state.sweeps.push(Sweep {
            wallet: self.name.clone(),
            from: account.address,
            amount,
            bitcoin_height,
        });
        Ok(vec![TxHash(random_hex())])
    }

    async fn main_address(&self) -> caravel_monero::Result<monero::Address> {
        Ok(self.main_address)
    }

    async fn get_balance(&self) -> caravel_monero::Result<XmrAmount> {
        Ok(self.ledger.balance(&self.name))
    }

    async fn block_height(&self) -> caravel_monero::Result<u64> {
        Ok(lock(&self.ledger.state).height)
    }

    async fn check_tx_key(
        &self,
        tx_hash: &TxHash,
        tx_key: &str,
        address: &monero::Address,
    ) -> caravel_monero::Result<TransferCheck> {
        let state = lock(&self.ledger.state);
        let transfer = state
            .transfers
            .iter()
            .find(|t| t.hash == *tx_hash)
            .ok_or_else(|| MoneroError::Rpc("transaction not found".into()))?;
        if transfer.key != tx_key {
            return Err(MoneroError::Key("tx key does not match".into()));
        }
        Ok(TransferCheck {
            received: if transfer.to == *address {
                transfer.amount
            } else {
                XmrAmount::ZERO
            },
            confirmations: transfer.mined.map_or(0, |h| state.height - h + 1),
            in_pool: transfer.mined.is_none(),
        })
    }

    async fn find_outgoing_transfer(
        &self,
        address: &monero::Address,
        amount: XmrAmount,
        _since_height: u64,
    ) -> caravel_monero::Result<Option<TransferProof>> {
        Ok(lock(&self.ledger.state)
            .transfers
            .iter()
            .find(|t| t.from == self.name && t.to == *address && t.amount == amount)
            .map(|t| TransferProof {
                tx_hash: t.hash.clone(),
                tx_key: t.key.clone(),
            }))
    }
}

pub fn spawn_miner(chain: SimChain, monero: SimMonero) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BLOCK_TIME);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            chain.mine();
            monero.mine();
        }
    })
}

pub fn xmr(amount: &str) -> XmrAmount {
    XmrAmount::from_xmr_str(amount).expect("valid amount")
}

pub const ALICE_XMR: &str = "10";

pub fn oracle() -> FixedRateOracle {
    FixedRateOracle::new(Rate::new(xmr("150")))
}

pub fn policy() -> QuotePolicy {
    QuotePolicy::default()
}

pub struct Party {
    pub bitcoin: Arc<SimBitcoinWallet>,
    pub monero: Arc<SimMoneroWallet>,
    pub store: Arc<dyn SwapStore>,
}

/// Two parties sharing simulated chains mined once per `BLOCK_TIME`.
pub struct World {
    pub chain: SimChain,
    pub ledger: SimMonero,
    pub alice: Party,
    pub bob: Party,
    miner: JoinHandle<()>,
}

impl World {
    pub fn new(alice_store: Arc<dyn SwapStore>, bob_store: Arc<dyn SwapStore>) -> Self {
        let chain = SimChain::new();
        let ledger = SimMonero::new(chain.clone());
        let alice = Party {
            bitcoin: Arc::new(SimBitcoinWallet::new(chain.clone())),
            monero: Arc::new(ledger.wallet("alice", xmr(ALICE_XMR))),
            store: alice_store,
        };
        let bob = Party {
            bitcoin: Arc::new(SimBitcoinWallet::new(chain.clone())),
            monero: Arc::new(ledger.wallet("bob", XmrAmount::ZERO)),
            store: bob_store,
        };
        let miner = spawn_miner(chain.clone(), ledger.clone());
        Self {
            chain,
            ledger,
            alice,
            bob,
            miner,
        }
    }

    pub fn alice_context(
        &self,
        swap_id: SwapId,
        channel: SwapChannel,
        config: SwapConfig,
    ) -> AliceContext {
        AliceContext {
            swap_id,
            bitcoin: self.alice.bitcoin.clone(),
            monero: self.alice.monero.clone(),
            store: self.alice.store.clone(),
            channel,
            config,
        }
    }

    pub fn bob_context(
        &self,
        swap_id: SwapId,
        channel: SwapChannel,
        config: SwapConfig,
    ) -> BobContext {
        BobContext {
            swap_id,
            bitcoin: self.bob.bitcoin.clone(),
            monero: self.bob.monero.clone(),
            store: self.bob.store.clone(),
            channel,
            config,
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.miner.abort();
    }
}

//! Whole swaps between a maker and a taker over simulated chains.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use bitcoin::Amount;
use caravel_bitcoin::BitcoinWallet;
use harness::{oracle, policy, xmr, World, ALICE_XMR};
use protocol::alice::{self, AliceState};
use protocol::bob::{self, BobState};
use protocol::messages::RedeemEncsig;
use protocol::{
    channel_pair, channel_transport, FileStore, Message, MemoryStore, Phase, Router, Swap,
    SwapChannel, SwapConfig, SwapId, SwapStore,
};

const BTC: Amount = Amount::from_sat(1_000_000);

fn memory_world() -> World {
    World::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
}

async fn negotiate(
    maker_ctx: &mut protocol::AliceContext,
    taker_ctx: &mut protocol::BobContext,
) -> (AliceState, BobState) {
    let maker = async {
        let btc = match maker_ctx.channel.recv().await.expect("request") {
            Message::SwapRequest(request) => request.btc,
            other => panic!("unexpected {}", other.name()),
        };
        alice::negotiate(maker_ctx, btc, &oracle(), &policy())
            .await
            .expect("maker negotiation")
    };
    let taker = async {
        bob::negotiate(taker_ctx, BTC)
            .await
            .expect("taker negotiation")
    };
    tokio::join!(maker, taker)
}

fn setup(state: &AliceState) -> &protocol::AliceSetup {
    match state {
        AliceState::Committed { setup } => setup,
        other => panic!("not committed: {}", other.name()),
    }
}

/// Passes messages between two channel ends, losing those `lost` matches.
async fn relay(mut maker: SwapChannel, mut taker: SwapChannel, lost: fn(&Message) -> bool) {
    loop {
        tokio::select! {
            Ok(message) = maker.recv() => {
                if !lost(&message) {
                    let _ = taker.send(message).await;
                }
            }
            Ok(message) = taker.recv() => {
                let _ = maker.send(message).await;
            }
            else => break,
        }
    }
}

fn phases(store: &dyn SwapStore, id: SwapId) -> Vec<Phase> {
    let mut phases: Vec<Phase> = store
        .history(id)
        .expect("history")
        .into_iter()
        .map(|t| t.phase)
        .collect();
    phases.dedup();
    phases
}

#[tokio::test(start_paused = true)]
async fn happy_path_over_routers() {
    let world = memory_world();
    let config = SwapConfig::regtest();

    let (maker_end, taker_end) = channel_transport();
    let (_maker_router, mut new_swaps) = Router::spawn(maker_end);
    let (taker_router, _) = Router::spawn(taker_end);

    let id = SwapId::random();
    let mut bob_ctx = world.bob_context(id, taker_router.register(id), config.clone());
    let maker = async {
        let new = new_swaps.recv().await.expect("incoming swap");
        let Message::SwapRequest(request) = new.message else {
            panic!("first message must be a request");
        };
        let mut ctx = world.alice_context(new.swap_id, new.channel, config.clone());
        let state = alice::negotiate(&mut ctx, request.btc, &oracle(), &policy())
            .await
            .expect("maker negotiation");
        (ctx, state)
    };
    let taker = bob::negotiate(&mut bob_ctx, BTC);
    let ((mut alice_ctx, alice_state), bob_state) = tokio::join!(maker, taker);
    let bob_state = bob_state.expect("taker negotiation");
    assert_eq!(alice_state.phase(), Phase::Committed);
    assert_eq!(bob_state.phase(), Phase::Committed);

    let redeem_address = setup(&alice_state).redeem_address.clone();
    let (alice_end, bob_end) = tokio::join!(
        alice::run(&mut alice_ctx, alice_state),
        bob::run(&mut bob_ctx, bob_state)
    );
    assert!(matches!(alice_end.unwrap(), AliceState::BtcRedeemed { .. }));
    assert!(matches!(bob_end.unwrap(), BobState::XmrSwept { .. }));

    assert!(world.chain.received(&redeem_address) > Amount::ZERO);
    assert_eq!(world.ledger.balance("bob"), xmr("1.5"));
    assert_eq!(world.ledger.balance("alice"), xmr("8.5"));

    assert_eq!(
        phases(world.bob.store.as_ref(), id),
        vec![
            Phase::Negotiating,
            Phase::Committed,
            Phase::BtcLocked,
            Phase::XmrLocked,
            Phase::RedeemBroadcast,
            Phase::XmrSwept,
        ]
    );
    assert_eq!(
        phases(world.alice.store.as_ref(), id).last(),
        Some(&Phase::BtcRedeemed)
    );
}

#[tokio::test(start_paused = true)]
async fn maker_resumes_from_journal_and_refunds() {
    let dir = tempfile::tempdir().unwrap();
    let alice_store = Arc::new(FileStore::open(dir.path()).unwrap());
    let world = World::new(alice_store, Arc::new(MemoryStore::new()));
    let config = SwapConfig::regtest();

    let id = SwapId::random();
    let (alice_channel, bob_channel) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, alice_channel, config.clone());
    let mut bob_ctx = world.bob_context(id, bob_channel, config.clone());
    let (alice_state, bob_state) = negotiate(&mut alice_ctx, &mut bob_ctx).await;

    // The maker locks Monero and goes down before telling the taker.
    let (alice_stopped, bob_end) = tokio::join!(
        alice::run_until(&mut alice_ctx, alice_state, alice::is_xmr_locked),
        bob::run(&mut bob_ctx, bob_state)
    );
    assert_eq!(alice_stopped.unwrap().name(), "xmr_locked");
    assert!(matches!(bob_end.unwrap(), BobState::BtcRefunded { .. }));
    drop(bob_ctx);
    drop(alice_ctx);

    let store: Arc<dyn SwapStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    assert_eq!(store.list_incomplete().unwrap().len(), 1);
    let Swap::Alice(resumed) = store.load_latest(id).unwrap() else {
        panic!("journal holds a maker swap");
    };
    assert_eq!(resumed.name(), "xmr_locked");

    let (channel, _peer_gone) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, channel, config);
    alice_ctx.store = store.clone();
    let end = alice::run(&mut alice_ctx, resumed).await.unwrap();
    assert!(matches!(end, AliceState::XmrRefunded { .. }));

    assert_eq!(world.ledger.balance("alice"), xmr(ALICE_XMR));
    assert_eq!(world.ledger.balance("bob"), xmr("0"));
    assert!(store.list_incomplete().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unresponsive_taker_is_punished() {
    let world = memory_world();
    let config = SwapConfig::regtest();
    let id = SwapId::random();
    let (alice_channel, bob_channel) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, alice_channel, config.clone());
    let mut bob_ctx = world.bob_context(id, bob_channel, config);
    let (alice_state, bob_state) = negotiate(&mut alice_ctx, &mut bob_ctx).await;
    let punish_address = setup(&alice_state).punish_address.clone();

    // The taker publishes the lock and then disappears until after the
    // punish timelock.
    let (alice_end, bob_stopped) = tokio::join!(
        alice::run(&mut alice_ctx, alice_state),
        bob::run_until(&mut bob_ctx, bob_state, bob::is_btc_locked)
    );
    assert!(matches!(alice_end.unwrap(), AliceState::BtcPunished { .. }));
    assert!(world.chain.received(&punish_address) > Amount::ZERO);

    let bob_end = bob::run(&mut bob_ctx, bob_stopped.unwrap()).await.unwrap();
    assert!(matches!(bob_end, BobState::BtcPunished { .. }));
    assert_eq!(world.ledger.balance("bob"), xmr("0"));
}

#[tokio::test(start_paused = true)]
async fn sweep_waits_out_a_redeem_reorg() {
    let world = memory_world();
    let config = SwapConfig {
        bitcoin_finality: 3,
        ..SwapConfig::regtest()
    };
    let id = SwapId::random();
    let (alice_channel, bob_channel) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, alice_channel, config.clone());
    let mut bob_ctx = world.bob_context(id, bob_channel, config);
    let (alice_state, bob_state) = negotiate(&mut alice_ctx, &mut bob_ctx).await;

    let redeem_txid = setup(&alice_state).transactions().unwrap().redeem.txid();
    world.chain.schedule_reorg(redeem_txid, 2, 2);

    let (alice_end, bob_end) = tokio::join!(
        alice::run(&mut alice_ctx, alice_state),
        bob::run(&mut bob_ctx, bob_state)
    );
    assert!(matches!(alice_end.unwrap(), AliceState::BtcRedeemed { .. }));
    assert!(matches!(bob_end.unwrap(), BobState::XmrSwept { .. }));
    assert_eq!(world.chain.reorgs(), 1);

    let mined = world.chain.mined_at(redeem_txid).expect("redeem mined");
    let sweep = world.ledger.sweeps().pop().expect("sweep");
    assert!(sweep.bitcoin_height >= mined + 2);
    assert_eq!(sweep.amount, xmr("1.5"));
}

#[tokio::test(start_paused = true)]
async fn mismatched_timelocks_abort_both_sides() {
    let world = memory_world();
    let id = SwapId::random();
    let (alice_channel, bob_channel) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, alice_channel, SwapConfig::regtest());
    let mut bob_ctx = world.bob_context(
        id,
        bob_channel,
        SwapConfig {
            cancel_timelock: caravel_bitcoin::CancelTimelock::new(144),
            ..SwapConfig::regtest()
        },
    );

    let (alice_end, bob_end) = negotiate(&mut alice_ctx, &mut bob_ctx).await;
    assert!(matches!(alice_end, AliceState::Aborted { .. }));
    let BobState::Aborted { reason } = bob_end else {
        panic!("taker should abort");
    };
    assert!(reason.contains("local settings"), "{reason}");
    assert_eq!(world.ledger.balance("alice"), xmr(ALICE_XMR));
}

#[tokio::test(start_paused = true)]
async fn oversized_request_is_refused() {
    let world = memory_world();
    let id = SwapId::random();
    let (alice_channel, bob_channel) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, alice_channel, SwapConfig::regtest());
    let mut bob_ctx = world.bob_context(id, bob_channel, SwapConfig::regtest());

    let maker = async {
        let Message::SwapRequest(request) = alice_ctx.channel.recv().await.unwrap() else {
            panic!("expected request");
        };
        alice::negotiate(&mut alice_ctx, request.btc, &oracle(), &policy())
            .await
            .unwrap()
    };
    let taker = bob::negotiate(&mut bob_ctx, Amount::from_sat(200_000_000));
    let (alice_end, bob_end) = tokio::join!(maker, taker);

    let AliceState::Aborted { reason } = alice_end else {
        panic!("maker should refuse");
    };
    assert!(reason.contains("outside limits"), "{reason}");
    assert!(matches!(bob_end.unwrap(), BobState::Aborted { .. }));
}

#[tokio::test(start_paused = true)]
async fn maker_abandons_swap_when_lock_never_appears() {
    let world = memory_world();
    let config = SwapConfig {
        lock_seen_timeout: Duration::from_secs(30),
        ..SwapConfig::regtest()
    };
    let id = SwapId::random();
    let (alice_channel, bob_channel) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, alice_channel, config.clone());
    let mut bob_ctx = world.bob_context(id, bob_channel, config);
    let (alice_state, _bob_state) = negotiate(&mut alice_ctx, &mut bob_ctx).await;

    let end = alice::run(&mut alice_ctx, alice_state).await.unwrap();
    let AliceState::Aborted { reason } = end else {
        panic!("maker should abandon the swap");
    };
    assert!(reason.contains("never appeared"), "{reason}");
    assert_eq!(world.ledger.balance("alice"), xmr(ALICE_XMR));
}

#[tokio::test(start_paused = true)]
async fn taker_resumes_from_journal_and_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let bob_store = Arc::new(FileStore::open(dir.path()).unwrap());
    let world = World::new(Arc::new(MemoryStore::new()), bob_store);
    let config = SwapConfig::regtest();

    let id = SwapId::random();
    let (alice_channel, bob_channel) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, alice_channel, config.clone());
    let mut bob_ctx = world.bob_context(id, bob_channel, config);
    let (alice_state, bob_state) = negotiate(&mut alice_ctx, &mut bob_ctx).await;

    // The taker records its encsig, goes down before sending it, and comes
    // back from the journal alone.
    let taker = async {
        let stopped = bob::run_until(&mut bob_ctx, bob_state, bob::is_enc_sig_sent)
            .await
            .unwrap();
        let BobState::EncSigSent { encsig: sent, .. } = stopped else {
            panic!("taker should stop after recording the encsig");
        };

        let store: Arc<dyn SwapStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        assert_eq!(store.list_incomplete().unwrap().len(), 1);
        let Swap::Bob(resumed) = store.load_latest(id).unwrap() else {
            panic!("journal holds a taker swap");
        };
        let BobState::EncSigSent { encsig: journaled, .. } = &resumed else {
            panic!("unexpected resumed state {}", resumed.name());
        };
        assert_eq!(
            serde_json::to_string(journaled).unwrap(),
            serde_json::to_string(&sent).unwrap()
        );

        bob_ctx.store = store.clone();
        let end = bob::run(&mut bob_ctx, resumed).await.unwrap();
        (end, store)
    };
    let (alice_end, (bob_end, store)) =
        tokio::join!(alice::run(&mut alice_ctx, alice_state), taker);

    assert!(matches!(alice_end.unwrap(), AliceState::BtcRedeemed { .. }));
    assert!(matches!(bob_end, BobState::XmrSwept { .. }));
    assert_eq!(world.ledger.balance("bob"), xmr("1.5"));
    assert!(store.list_incomplete().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn taker_claims_xmr_when_redeem_beats_cancel() {
    let world = memory_world();
    let config = SwapConfig::regtest();
    let id = SwapId::random();
    let (alice_channel, bob_channel) = channel_pair(id);
    let mut alice_ctx = world.alice_context(id, alice_channel, config.clone());
    let mut bob_ctx = world.bob_context(id, bob_channel, config);
    let (alice_state, bob_state) = negotiate(&mut alice_ctx, &mut bob_ctx).await;

    // The maker signs the redeem but holds it back until the taker has
    // already recorded TxCancel as published.
    let taker = async {
        let stopped = bob::run_until(&mut bob_ctx, bob_state, bob::is_enc_sig_sent)
            .await
            .unwrap();
        let BobState::EncSigSent { setup, encsig, .. } = stopped else {
            panic!("taker should stop after recording the encsig");
        };
        bob_ctx
            .channel
            .send(Message::EncryptedSignature(Box::new(RedeemEncsig {
                tx_redeem_encsig: encsig.clone(),
            })))
            .await
            .unwrap();
        (setup, encsig)
    };
    let (alice_stopped, (setup, encsig)) = tokio::join!(
        alice::run_until(&mut alice_ctx, alice_state, alice::is_redeem_broadcast),
        taker
    );
    let AliceState::RedeemBroadcast { tx_redeem, .. } = alice_stopped.unwrap() else {
        panic!("maker should hold a signed redeem");
    };

    let txs = setup.transactions().unwrap();
    tokio::time::sleep(harness::BLOCK_TIME * (setup.params.cancel_timelock.blocks() + 1)).await;
    world.alice.bitcoin.broadcast(&tx_redeem).await.unwrap();

    let cancelled = BobState::BtcCancelled {
        setup,
        encsig: Some(encsig),
    };
    let end = bob::run(&mut bob_ctx, cancelled).await.unwrap();
    assert!(matches!(end, BobState::XmrSwept { .. }));
    assert_eq!(world.ledger.balance("bob"), xmr("1.5"));
    assert!(world.chain.transaction(txs.cancel.txid()).is_none());
    assert!(world.chain.transaction(txs.refund.txid()).is_none());
}

#[tokio::test(start_paused = true)]
async fn lost_reply_frees_the_lock_inputs() {
    let world = memory_world();
    let config = SwapConfig::regtest();
    let id = SwapId::random();
    let (alice_channel, maker_side) = channel_pair(id);
    let (taker_side, bob_channel) = channel_pair(id);
    tokio::spawn(relay(maker_side, taker_side, |message| {
        matches!(message, Message::Message3(_))
    }));
    let mut alice_ctx = world.alice_context(id, alice_channel, config.clone());
    let mut bob_ctx = world.bob_context(id, bob_channel, config);

    let (alice_end, bob_end) = negotiate(&mut alice_ctx, &mut bob_ctx).await;
    assert!(matches!(alice_end, AliceState::Aborted { .. }));
    assert!(matches!(bob_end, BobState::Aborted { .. }));
    assert_eq!(world.bob.bitcoin.reserved(), 0);
}

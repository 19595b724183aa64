//! Property-based tests for card conservation, turn authority and refusals

use proptest::prelude::*;

use durak::game::cards::full_deck;
use durak::game::{acting_role, DECK_SIZE};
use durak::{
    active_role, beats, Card, CardEngine, GamePhase, GameStateEnvelope, ParticipantId,
    PlayerAction, Role, Suit,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Every action the engine should accept for the role that must act
fn legal_actions(engine: &CardEngine) -> Vec<(Role, PlayerAction)> {
    let state = engine.state();
    let Some(role) = acting_role(state) else {
        return Vec::new();
    };

    let mut actions = Vec::new();
    match state.game_phase {
        GamePhase::Attacking => {
            if state.battle_area.len() < 6 {
                actions.extend(
                    engine
                        .legal_moves_for(role)
                        .into_iter()
                        .map(|card| (role, PlayerAction::Attack(card))),
                );
            }
            if !state.battle_area.is_empty() && state.all_defended() {
                actions.push((role, PlayerAction::Beat));
                actions.push((role, PlayerAction::Pass));
            }
        }
        GamePhase::Defending => {
            actions.extend(
                engine
                    .legal_moves_for(role)
                    .into_iter()
                    .map(|card| (role, PlayerAction::Defend(card))),
            );
            actions.push((role, PlayerAction::Take));
        }
    }
    actions
}

fn arb_card() -> impl Strategy<Value = Card> {
    (0usize..DECK_SIZE).prop_map(|index| full_deck()[index])
}

fn arb_suit() -> impl Strategy<Value = Suit> {
    (0usize..4).prop_map(|index| Suit::ALL[index])
}

fn arb_action() -> impl Strategy<Value = (Role, PlayerAction)> {
    let role = prop_oneof![Just(Role::A), Just(Role::B)];
    let action = prop_oneof![
        arb_card().prop_map(PlayerAction::Attack),
        arb_card().prop_map(PlayerAction::Defend),
        Just(PlayerAction::Take),
        Just(PlayerAction::Beat),
        Just(PlayerAction::Pass),
    ];
    (role, action)
}

proptest! {
    #[test]
    fn prop_random_legal_play_conserves_cards(
        seed in any::<u64>(),
        choices in prop::collection::vec(any::<prop::sample::Index>(), 1..300)
    ) {
        let mut engine = CardEngine::new();
        engine.deal_initial(&mut StdRng::seed_from_u64(seed)).unwrap();

        for choice in choices {
            let actions = legal_actions(&engine);
            if actions.is_empty() {
                prop_assert!(engine.state().is_game_over);
                break;
            }
            let (role, action) = actions[choice.index(actions.len())];
            prop_assert!(engine.apply(role, action).is_ok(), "{:?} by {:?} refused", action, role);

            let state = engine.state();
            prop_assert_eq!(state.card_count(), DECK_SIZE);
            prop_assert!(state.check_invariants().is_ok());
            prop_assert!(state.hand_a.len() + state.hand_b.len() <= DECK_SIZE);
            if state.is_game_over {
                prop_assert!(!active_role(state, Role::A) && !active_role(state, Role::B));
                prop_assert_eq!(state.derive_terminal_outcome(), state.outcome());
            } else {
                prop_assert!(active_role(state, Role::A) != active_role(state, Role::B));
            }
        }
    }

    #[test]
    fn prop_refused_actions_never_mutate(
        seed in any::<u64>(),
        warmup in prop::collection::vec(any::<prop::sample::Index>(), 0..40),
        attempts in prop::collection::vec(arb_action(), 1..50)
    ) {
        let mut engine = CardEngine::new();
        engine.deal_initial(&mut StdRng::seed_from_u64(seed)).unwrap();
        for choice in warmup {
            let actions = legal_actions(&engine);
            if actions.is_empty() {
                break;
            }
            let (role, action) = actions[choice.index(actions.len())];
            engine.apply(role, action).unwrap();
        }

        for (role, action) in attempts {
            let before = engine.state().clone();
            if engine.apply(role, action).is_err() {
                prop_assert_eq!(engine.state(), &before);
            } else {
                prop_assert!(engine.state().check_invariants().is_ok());
            }
        }
    }

    #[test]
    fn prop_beats_formula(attack in arb_card(), defense in arb_card(), trump in arb_suit()) {
        let expected = (attack.suit == defense.suit && defense.value() > attack.value())
            || (defense.suit == trump && attack.suit != trump);
        prop_assert_eq!(beats(&attack, &defense, trump), expected);
        // never both ways
        prop_assert!(!(beats(&attack, &defense, trump) && beats(&defense, &attack, trump)));
    }

    #[test]
    fn prop_deal_uses_every_card_once(seed in any::<u64>()) {
        let mut engine = CardEngine::new();
        engine.deal_initial(&mut StdRng::seed_from_u64(seed)).unwrap();
        let state = engine.state();

        let mut seen: Vec<Card> = state
            .deck
            .iter()
            .chain(&state.hand_a)
            .chain(&state.hand_b)
            .copied()
            .collect();
        seen.sort_by_key(|card| (card.suit, card.rank));
        let mut expected = full_deck();
        expected.sort_by_key(|card| (card.suit, card.rank));
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(state.trump_card, state.deck.first().copied());
    }

    #[test]
    fn prop_envelope_digest_detects_tampering(seed in any::<u64>(), steal in 0usize..6) {
        let mut engine = CardEngine::new();
        engine.deal_initial(&mut StdRng::seed_from_u64(seed)).unwrap();
        let mut envelope =
            GameStateEnvelope::initial(engine.state().clone(), ParticipantId::new("host")).unwrap();
        prop_assert!(envelope.is_consistent());

        let card = envelope.game_data.hand_b.remove(steal);
        envelope.game_data.hand_a.push(card);
        prop_assert!(!envelope.is_consistent());
    }
}

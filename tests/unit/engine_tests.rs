//! Unit tests for the rule engine and turn authority

use std::collections::HashSet;

use durak::game::cards::full_deck;
use durak::game::{acting_role, LastAction, PassResolution, DECK_SIZE};
use durak::{
    active_role, beats, Card, CardEngine, GamePhase, GameState, PlayerAction, Rank, Role,
    RuleViolation, Suit,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::mocks::card;

fn cards(inputs: &[&str]) -> Vec<Card> {
    inputs.iter().map(|input| card(input)).collect()
}

/// Dealt state with the given hands and deck; every other card is in the
/// beat pile so the full deck is accounted for
fn arranged(hand_a: &[&str], hand_b: &[&str], deck: &[&str], trump: Suit) -> GameState {
    let hand_a = cards(hand_a);
    let hand_b = cards(hand_b);
    let deck = cards(deck);
    let used: HashSet<Card> = hand_a.iter().chain(&hand_b).chain(&deck).copied().collect();
    let beat_pile = full_deck()
        .into_iter()
        .filter(|card| !used.contains(card))
        .collect();

    let state = GameState {
        trump_card: deck.first().copied().or(Some(Card::new(Rank::Six, trump))),
        trump_suit: Some(trump),
        deck,
        hand_a,
        hand_b,
        beat_pile,
        ..GameState::default()
    };
    assert!(state.check_invariants().is_ok());
    state
}

#[test]
fn test_shuffled_deal_is_complete() {
    for seed in 0..20 {
        let mut engine = CardEngine::new();
        engine.deal_initial(&mut StdRng::seed_from_u64(seed)).unwrap();
        let state = engine.state();

        let mut all: Vec<Card> = state
            .deck
            .iter()
            .chain(&state.hand_a)
            .chain(&state.hand_b)
            .copied()
            .collect();
        assert_eq!(all.len(), DECK_SIZE);
        all.sort_by_key(|card| (card.suit, card.rank));
        all.dedup();
        assert_eq!(all.len(), DECK_SIZE);
    }
}

#[test]
fn test_seeded_deal_layout() {
    let seed = 42;
    let mut shuffled = full_deck();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut engine = CardEngine::new();
    engine.deal_initial(&mut StdRng::seed_from_u64(seed)).unwrap();
    let state = engine.state();

    // cards come off the end of the deck, alternating A then B
    let mut expected_a: Vec<Card> = (0..6).map(|i| shuffled[35 - 2 * i]).collect();
    let mut expected_b: Vec<Card> = (0..6).map(|i| shuffled[34 - 2 * i]).collect();
    let mut hand_a = state.hand_a.clone();
    let mut hand_b = state.hand_b.clone();
    for hand in [&mut expected_a, &mut expected_b, &mut hand_a, &mut hand_b] {
        hand.sort_by_key(|card| (card.suit, card.rank));
    }
    assert_eq!(hand_a, expected_a);
    assert_eq!(hand_b, expected_b);

    assert_eq!(state.deck, shuffled[..24].to_vec());
    assert_eq!(state.trump_card, Some(shuffled[0]));
    assert_eq!(state.trump_suit, Some(shuffled[0].suit));
    assert_eq!(state.current_turn, Role::A);
    assert_eq!(state.game_phase, GamePhase::Attacking);
}

#[test]
fn test_beats_relation() {
    let trump = Suit::Hearts;
    // same suit: strictly higher value
    assert!(beats(&card("9S"), &card("10S"), trump));
    assert!(!beats(&card("10S"), &card("9S"), trump));
    assert!(!beats(&card("9S"), &card("9S"), trump));
    // trump over non-trump regardless of rank
    assert!(beats(&card("AS"), &card("6H"), trump));
    // non-trump never beats trump
    assert!(!beats(&card("6H"), &card("AS"), trump));
    // off-suit non-trump never beats
    assert!(!beats(&card("9S"), &card("AD"), trump));
    // trump on trump by value
    assert!(beats(&card("7H"), &card("8H"), trump));
    assert!(!beats(&card("8H"), &card("7H"), trump));
}

#[test]
fn test_beats_matches_formula_for_every_pair() {
    let deck = full_deck();
    for trump in Suit::ALL {
        for attack in &deck {
            for defense in &deck {
                let expected = (defense.suit == attack.suit && defense.value() > attack.value())
                    || (defense.suit == trump && attack.suit != trump);
                assert_eq!(beats(attack, defense, trump), expected, "{} vs {}", attack, defense);
            }
        }
    }
}

#[test]
fn test_any_card_opens_an_attack() {
    let state = arranged(&["9S", "KD", "7H"], &["6S", "10S"], &["6H"], Suit::Hearts);
    let engine = CardEngine::from_state(state.clone());
    assert_eq!(engine.legal_moves_for(Role::A), state.hand_a);
    assert!(engine.legal_moves_for(Role::B).is_empty());
}

#[test]
fn test_follow_up_attacks_match_table_ranks() {
    let state = arranged(&["9S", "9D", "KS", "10C"], &["10S", "7C"], &["6H"], Suit::Hearts);
    let mut engine = CardEngine::from_state(state);
    engine.play_attack(Role::A, card("9S")).unwrap();
    engine.play_defense(Role::B, card("10S")).unwrap();

    let mut legal = engine.legal_moves_for(Role::A);
    legal.sort_by_key(|card| (card.suit, card.rank));
    // 9 from the attack, 10 from the defense
    assert_eq!(legal, cards(&["9D", "10C"]));

    let before = engine.state().clone();
    assert_eq!(
        engine.play_attack(Role::A, card("KS")),
        Err(RuleViolation::IllegalCard("K♠".to_string()))
    );
    assert_eq!(engine.state(), &before);
}

#[test]
fn test_nine_of_spades_without_answer_must_be_taken() {
    let state = arranged(
        &["9S", "KD"],
        &["6S", "8D", "JC"],
        &["6H", "7C"],
        Suit::Hearts,
    );
    let mut engine = CardEngine::from_state(state);
    engine.play_attack(Role::A, card("9S")).unwrap();

    assert!(active_role(engine.state(), Role::B));
    assert!(engine.legal_moves_for(Role::B).is_empty());

    let before = engine.state().clone();
    assert_eq!(
        engine.play_defense(Role::B, card("6S")),
        Err(RuleViolation::IllegalCard("6♠".to_string()))
    );
    assert_eq!(engine.state(), &before);

    engine.take_cards(Role::B).unwrap();
    let state = engine.state();
    assert!(state.hand_b.contains(&card("9S")));
    assert!(state.battle_area.is_empty());
    assert_eq!(state.current_turn, Role::A);
    assert_eq!(state.last_action, LastAction::Take);
    assert_eq!(state.card_count(), DECK_SIZE);
}

#[test]
fn test_take_refills_attacker_first() {
    let state = arranged(
        &["9S", "KD", "QD", "JD", "10D", "8D"],
        &["6S", "7D", "8C", "9C", "10C", "JC"],
        &["6H", "7H"],
        Suit::Hearts,
    );
    let mut engine = CardEngine::from_state(state);
    engine.play_attack(Role::A, card("9S")).unwrap();
    engine.take_cards(Role::B).unwrap();

    let state = engine.state();
    // attacker is one short and draws the top card; the defender already
    // holds seven and draws nothing
    assert_eq!(state.hand_a.len(), 6);
    assert!(state.hand_a.contains(&card("7H")));
    assert_eq!(state.hand_b.len(), 7);
    assert_eq!(state.deck, cards(&["6H"]));
}

#[test]
fn test_beat_discards_table_and_flips_turn() {
    let state = arranged(&["9S", "KD"], &["10S", "7C"], &["6H", "7H", "8H"], Suit::Hearts);
    let mut engine = CardEngine::from_state(state);
    engine.play_attack(Role::A, card("9S")).unwrap();
    engine.play_defense(Role::B, card("10S")).unwrap();
    assert_eq!(engine.state().game_phase, GamePhase::Attacking);

    engine.beat_cards(Role::A).unwrap();
    let state = engine.state();
    assert!(state.battle_area.is_empty());
    assert!(state.beat_pile.contains(&card("9S")) && state.beat_pile.contains(&card("10S")));
    assert_eq!(state.current_turn, Role::B);
    assert_eq!(state.game_phase, GamePhase::Attacking);
    assert_eq!(state.last_action, LastAction::Beat);
    // new attacker B draws first and empties the deck
    assert!(state.deck.is_empty());
    assert_eq!(state.hand_b.len(), 4);
    assert_eq!(state.hand_a, cards(&["KD"]));
    assert!(!state.is_game_over);
    assert!(state.check_invariants().is_ok());
}

#[test]
fn test_pass_on_covered_table_equals_beat() {
    let state = arranged(&["9S", "KD"], &["10S", "7C"], &["6H", "7H", "8H"], Suit::Hearts);
    let mut beaten = CardEngine::from_state(state);
    beaten.play_attack(Role::A, card("9S")).unwrap();
    beaten.play_defense(Role::B, card("10S")).unwrap();
    let mut passed = beaten.clone();

    beaten.apply(Role::A, PlayerAction::Beat).unwrap();
    assert_eq!(passed.pass_attack(Role::A), Ok(PassResolution::Beaten));
    assert_eq!(passed.state(), beaten.state());
}

#[test]
fn test_beat_with_undefended_attack_is_refused() {
    let state = arranged(&["9S", "KD"], &["6S", "7C"], &["6H"], Suit::Hearts);
    let mut engine = CardEngine::from_state(state);
    engine.play_attack(Role::A, card("9S")).unwrap();

    let before = engine.state().clone();
    assert_eq!(engine.beat_cards(Role::A), Err(RuleViolation::UndefendedAttacks));
    assert_eq!(engine.state(), &before);
}

#[test]
fn test_out_of_turn_moves_do_not_mutate() {
    let state = arranged(&["9S", "KD"], &["10S", "7C"], &["6H"], Suit::Hearts);
    let mut engine = CardEngine::from_state(state);
    let before = engine.state().clone();

    assert_eq!(
        engine.apply(Role::B, PlayerAction::Attack(card("10S"))),
        Err(RuleViolation::OutOfTurn {
            expected: Role::A,
            actual: Role::B
        })
    );
    assert!(engine.apply(Role::B, PlayerAction::Take).is_err());
    assert!(engine.apply(Role::A, PlayerAction::Defend(card("9S"))).is_err());
    assert_eq!(engine.state(), &before);
}

#[test]
fn test_last_card_with_empty_deck_wins() {
    let state = arranged(&["9S"], &["6S", "7C"], &[], Suit::Hearts);
    let mut engine = CardEngine::from_state(state);
    engine.play_attack(Role::A, card("9S")).unwrap();

    let state = engine.state();
    assert!(state.is_game_over);
    assert_eq!(state.winner, Some(Role::A));
    assert_eq!(acting_role(state), None);
    assert_eq!(
        engine.clone().take_cards(Role::B),
        Err(RuleViolation::GameOver)
    );
}

#[test]
fn test_simultaneous_empty_hands_is_a_draw() {
    let mut engine = CardEngine::from_state(arranged(&[], &[], &[], Suit::Hearts));
    assert!(engine.check_terminal());
    assert!(!engine.check_terminal());

    let state = engine.state();
    assert!(state.is_game_over);
    assert_eq!(state.winner, None);
    assert_eq!(state.outcome(), Some(durak::GameOutcome::Draw));
}

#[test]
fn test_no_terminal_while_deck_has_cards() {
    let state = arranged(&["9S"], &["10S", "7C"], &["6H"], Suit::Hearts);
    let mut engine = CardEngine::from_state(state);
    engine.play_attack(Role::A, card("9S")).unwrap();
    assert!(engine.state().hand_a.is_empty());
    assert!(!engine.state().is_game_over);
}

#[test]
fn test_seventh_attack_is_refused_when_table_is_full() {
    let state = arranged(
        &["9S", "9D", "9C", "10H", "JS", "QD", "9H"],
        &["10S", "10D", "10C", "JH", "QS", "KD"],
        &["6H"],
        Suit::Hearts,
    );
    let mut engine = CardEngine::from_state(state);
    for (attack, defense) in [
        ("9S", "10S"),
        ("9D", "10D"),
        ("9C", "10C"),
        ("10H", "JH"),
        ("JS", "QS"),
        ("QD", "KD"),
    ] {
        engine.play_attack(Role::A, card(attack)).unwrap();
        engine.play_defense(Role::B, card(defense)).unwrap();
    }
    assert_eq!(engine.state().battle_area.len(), 6);
    assert!(engine.legal_moves_for(Role::A).is_empty());

    // 9H matches a rank on the table but there is no room left
    let before = engine.state().clone();
    assert_eq!(
        engine.play_attack(Role::A, card("9H")),
        Err(RuleViolation::BattleAreaFull)
    );
    assert_eq!(engine.state(), &before);
}

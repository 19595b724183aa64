//! Playing cards for the 36-card Durak deck

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GameProtocolError;

/// Number of cards in a Durak deck (4 suits x 9 ranks)
pub const DECK_SIZE: usize = 36;

/// Playing card suit, declared in the fixed sort order used for hands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Suit {
    Spades = 0,
    Hearts = 1,
    Diamonds = 2,
    Clubs = 3,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];

    /// Create suit from its sort index (0-3)
    pub fn from_u8(value: u8) -> Result<Self, GameProtocolError> {
        match value {
            0 => Ok(Suit::Spades),
            1 => Ok(Suit::Hearts),
            2 => Ok(Suit::Diamonds),
            3 => Ok(Suit::Clubs),
            _ => Err(GameProtocolError::Validation {
                message: format!("Invalid suit value: {}", value),
                field: Some("suit".to_string()),
            }),
        }
    }

    /// Get the symbol for this suit
    pub fn symbol(&self) -> &'static str {
        match self {
            Suit::Spades => "♠",
            Suit::Hearts => "♥",
            Suit::Diamonds => "♦",
            Suit::Clubs => "♣",
        }
    }

    /// Get the name for this suit
    pub fn name(&self) -> &'static str {
        match self {
            Suit::Spades => "Spades",
            Suit::Hearts => "Hearts",
            Suit::Diamonds => "Diamonds",
            Suit::Clubs => "Clubs",
        }
    }

    pub fn is_red(&self) -> bool {
        matches!(self, Suit::Hearts | Suit::Diamonds)
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Card rank; the discriminant is the card's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    Six = 6,
    Seven = 7,
    Eight = 8,
    Nine = 9,
    Ten = 10,
    Jack = 11,
    Queen = 12,
    King = 13,
    Ace = 14,
}

impl Rank {
    pub const ALL: [Rank; 9] = [
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
        Rank::Ace,
    ];

    /// Create rank from its value (6-14)
    pub fn from_value(value: u8) -> Result<Self, GameProtocolError> {
        Rank::ALL
            .iter()
            .copied()
            .find(|rank| rank.value() == value)
            .ok_or_else(|| GameProtocolError::Validation {
                message: format!("Invalid rank value: {}", value),
                field: Some("rank".to_string()),
            })
    }

    /// Get the numeric value for this rank (6-14)
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Get the display character for this rank
    pub fn symbol(&self) -> &'static str {
        match self {
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
            Rank::Ace => "A",
        }
    }

    /// Get the name for this rank
    pub fn name(&self) -> &'static str {
        match self {
            Rank::Six => "Six",
            Rank::Seven => "Seven",
            Rank::Eight => "Eight",
            Rank::Nine => "Nine",
            Rank::Ten => "Ten",
            Rank::Jack => "Jack",
            Rank::Queen => "Queen",
            Rank::King => "King",
            Rank::Ace => "Ace",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// An immutable playing card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }

    pub fn value(&self) -> u8 {
        self.rank.value()
    }

    /// Get a short string representation (e.g., "A♠", "10♥")
    pub fn short_string(&self) -> String {
        format!("{}{}", self.rank.symbol(), self.suit.symbol())
    }

    /// Get a full name representation (e.g., "Ace of Spades")
    pub fn full_name(&self) -> String {
        format!("{} of {}", self.rank.name(), self.suit.name())
    }

    /// Parse the short form produced by [`Card::short_string`], or an ASCII
    /// variant using S/H/D/C for the suit (e.g. "10H", "qs")
    pub fn parse(input: &str) -> Result<Self, GameProtocolError> {
        let input = input.trim();
        let invalid = || GameProtocolError::Validation {
            message: format!("Invalid card: {}", input),
            field: Some("card".to_string()),
        };

        let suit_char = input.chars().last().ok_or_else(invalid)?;
        let rank_part = &input[..input.len() - suit_char.len_utf8()];

        let suit = match suit_char.to_ascii_uppercase() {
            '♠' | 'S' => Suit::Spades,
            '♥' | 'H' => Suit::Hearts,
            '♦' | 'D' => Suit::Diamonds,
            '♣' | 'C' => Suit::Clubs,
            _ => return Err(invalid()),
        };
        let rank = match rank_part.to_ascii_uppercase().as_str() {
            "6" => Rank::Six,
            "7" => Rank::Seven,
            "8" => Rank::Eight,
            "9" => Rank::Nine,
            "10" | "T" => Rank::Ten,
            "J" => Rank::Jack,
            "Q" => Rank::Queen,
            "K" => Rank::King,
            "A" => Rank::Ace,
            _ => return Err(invalid()),
        };
        Ok(Card::new(rank, suit))
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_string())
    }
}

/// Whether `defense` beats `attack` under `trump`.
///
/// Same suit needs a strictly higher value; a trump beats any non-trump;
/// a non-trump never beats a trump.
pub fn beats(attack: &Card, defense: &Card, trump: Suit) -> bool {
    if attack.suit == defense.suit {
        return defense.value() > attack.value();
    }
    defense.suit == trump && attack.suit != trump
}

/// Fresh deck in suit-major order
pub fn full_deck() -> Vec<Card> {
    let mut deck = Vec::with_capacity(DECK_SIZE);
    for suit in Suit::ALL {
        for rank in Rank::ALL {
            deck.push(Card::new(rank, suit));
        }
    }
    deck
}

/// Sort a hand: trumps last, otherwise by value then suit order
pub fn sort_hand(hand: &mut [Card], trump: Option<Suit>) {
    hand.sort_by_key(|card| (Some(card.suit) == trump, card.value(), card.suit));
}

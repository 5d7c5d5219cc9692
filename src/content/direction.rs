//! Right-to-left script detection for display hints.
//!
//! Letters are bucketed by fixed Unicode block ranges. A text is RTL when
//! strictly more than 30% of its letters are RTL; mixed-script text with an
//! RTL minority renders left-to-right.
//!
//! The language `code` is a tie-break heuristic for choosing fonts and
//! alignment. It is not language identification. Urdu shares every Persian
//! letter, so Persian letters only count as Persian when none of the
//! Urdu-only letters appear.

use serde::Serialize;

/// Percentage of RTL letters above which a text is treated as RTL.
pub const RTL_THRESHOLD_PERCENT: f64 = 30.0;

/// Persian letters absent from Arabic. Urdu uses all of them too.
const PERSIAN_LETTERS: &[char] = &['\u{067E}', '\u{0686}', '\u{0698}', '\u{06AF}', '\u{06A9}', '\u{06CC}'];

/// Urdu-only letters (retroflex consonants, noon ghunna, do-chashmi he,
/// gol he, bari ye). None occur in Persian.
const URDU_LETTERS: &[char] = &[
    '\u{0679}', '\u{0688}', '\u{0691}', '\u{06BA}', '\u{06BE}', '\u{06C1}', '\u{06D2}',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextDirection {
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextAlignment {
    Left,
    Right,
}

/// Result of [`detect`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Direction {
    /// Display hint: `fa`, `he`, `ur`, `ar`, `rtl` or `ltr`.
    pub code: &'static str,
    pub is_rtl: bool,
    /// 0.0..=1.0; 0.0 when the text has no letters.
    pub confidence: f64,
    pub rtl_percentage: f64,
}

impl Direction {
    pub fn text_direction(&self) -> TextDirection {
        if self.is_rtl {
            TextDirection::Rtl
        } else {
            TextDirection::Ltr
        }
    }

    pub fn text_alignment(&self) -> TextAlignment {
        if self.is_rtl {
            TextAlignment::Right
        } else {
            TextAlignment::Left
        }
    }
}

fn is_hebrew(c: char) -> bool {
    matches!(c, '\u{0590}'..='\u{05FF}' | '\u{FB1D}'..='\u{FB4F}')
}

fn is_arabic(c: char) -> bool {
    matches!(
        c,
        '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFF}'
    )
}

fn is_rtl_char(c: char) -> bool {
    is_hebrew(c)
        || is_arabic(c)
        // Syriac, Thaana
        || matches!(c, '\u{0700}'..='\u{074F}' | '\u{0780}'..='\u{07BF}')
}

/// Classifies `text` as RTL or LTR.
pub fn detect(text: &str) -> Direction {
    let mut letters = 0usize;
    let mut rtl = 0usize;
    let mut persian = false;
    let mut hebrew = false;
    let mut urdu = false;
    let mut arabic = false;

    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if !is_rtl_char(c) {
            continue;
        }
        rtl += 1;
        persian |= PERSIAN_LETTERS.contains(&c);
        urdu |= URDU_LETTERS.contains(&c);
        hebrew |= is_hebrew(c);
        arabic |= is_arabic(c);
    }

    if letters == 0 {
        return Direction {
            code: "ltr",
            is_rtl: false,
            confidence: 0.0,
            rtl_percentage: 0.0,
        };
    }

    let rtl_percentage = rtl as f64 * 100.0 / letters as f64;
    let is_rtl = rtl_percentage > RTL_THRESHOLD_PERCENT;

    let code = if !is_rtl {
        "ltr"
    } else if persian && !urdu {
        "fa"
    } else if hebrew {
        "he"
    } else if urdu {
        "ur"
    } else if arabic {
        "ar"
    } else {
        "rtl"
    };

    let confidence = if is_rtl {
        rtl_percentage / 100.0
    } else {
        (100.0 - rtl_percentage) / 100.0
    };

    Direction {
        code,
        is_rtl,
        confidence,
        rtl_percentage,
    }
}

/// Shorthand for `detect(text).text_direction()`.
pub fn text_direction(text: &str) -> TextDirection {
    detect(text).text_direction()
}

/// Shorthand for `detect(text).text_alignment()`.
pub fn text_alignment(text: &str) -> TextAlignment {
    detect(text).text_alignment()
}

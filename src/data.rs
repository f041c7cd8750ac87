//! Character ↔ representation lookup tables and validation.
//!
//! A representation is a string of `.` and `-` describing one character,
//! e.g. `".-"` for `A`. The table carries the standard ITU set, a handful
//! of procedural signs mapped onto single ASCII characters, and the
//! ISO-8859-1 accented extensions. Lookup is case-insensitive for letters.

use std::collections::HashMap;

use lazy_static::lazy_static;
use phf::phf_map;

/// Representation of a dot, as stored in representation strings.
pub const DOT: char = '.';
/// Representation of a dash, as stored in representation strings.
pub const DASH: char = '-';

/// Character → representation. Procedural signs ride on ASCII characters:
/// `<` = VA/SK, `>` = BK, `!` = SN, `&` = AS, `^` = KA, `~` = AL.
static CHARACTERS: phf::Map<char, &'static str> = phf_map! {
    'A' => ".-",      'B' => "-...",    'C' => "-.-.",    'D' => "-..",
    'E' => ".",       'F' => "..-.",    'G' => "--.",     'H' => "....",
    'I' => "..",      'J' => ".---",    'K' => "-.-",     'L' => ".-..",
    'M' => "--",      'N' => "-.",      'O' => "---",     'P' => ".--.",
    'Q' => "--.-",    'R' => ".-.",     'S' => "...",     'T' => "-",
    'U' => "..-",     'V' => "...-",    'W' => ".--",     'X' => "-..-",
    'Y' => "-.--",    'Z' => "--..",

    '0' => "-----",   '1' => ".----",   '2' => "..---",   '3' => "...--",
    '4' => "....-",   '5' => ".....",   '6' => "-....",   '7' => "--...",
    '8' => "---..",   '9' => "----.",

    '"' => ".-..-.",  '\'' => ".----.", '$' => "...-..-", '(' => "-.--.",
    ')' => "-.--.-",  '+' => ".-.-.",   ',' => "--..--",  '-' => "-....-",
    '.' => ".-.-.-",  '/' => "-..-.",   ':' => "---...",  ';' => "-.-.-.",
    '=' => "-...-",   '?' => "..--..",  '_' => "..--.-",  '@' => ".--.-.",

    '<' => "...-.-",  '>' => "-...-.-", '!' => "...-.",   '&' => ".-...",
    '^' => "-.-.-",   '~' => ".-.-..",

    'Ü' => "..--",    'Ä' => ".-.-",    'Ç' => "-.-..",   'Ö' => "---.",
    'É' => "..-..",   'È' => ".-..-",   'À' => ".--.-",   'Å' => ".--.-",
    'Ñ' => "--.--",
};

/// NATO phonetic alphabet, indexed by `letter as usize - 'A' as usize`.
static PHONETICS: [&str; 26] = [
    "Alfa", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India", "Juliett",
    "Kilo", "Lima", "Mike", "November", "Oscar", "Papa", "Quebec", "Romeo", "Sierra", "Tango",
    "Uniform", "Victor", "Whiskey", "X-ray", "Yankee", "Zulu",
];

lazy_static! {
    /// Representation → character, derived from [`CHARACTERS`]. Where two
    /// characters share a representation (`À`/`Å`) the lower code point
    /// wins, so reverse lookup is deterministic.
    static ref REPRESENTATIONS: HashMap<&'static str, char> = {
        let mut m = HashMap::with_capacity(CHARACTERS.len());
        for (c, r) in CHARACTERS.entries() {
            m.entry(*r)
                .and_modify(|e: &mut char| {
                    if *c < *e {
                        *e = *c;
                    }
                })
                .or_insert(*c);
        }
        m
    };
}

/// Normalize a character for table lookup.
fn lookup_key(c: char) -> char {
    c.to_uppercase().next().unwrap_or(c)
}

/// Look up the representation of `c`, e.g. `'a'` → `".-"`.
pub fn character_to_representation(c: char) -> Option<&'static str> {
    CHARACTERS.get(&lookup_key(c)).copied()
}

/// Look up the character a representation maps to, e.g. `".-"` → `'A'`.
pub fn representation_to_character(representation: &str) -> Option<char> {
    REPRESENTATIONS.get(representation).copied()
}

/// Whether `c` can be sent. The space character is sendable (it becomes an
/// inter-word gap) even though it has no representation.
pub fn character_is_valid(c: char) -> bool {
    c == ' ' || CHARACTERS.contains_key(&lookup_key(c))
}

/// Whether every character of `s` can be sent.
pub fn string_is_valid(s: &str) -> bool {
    s.chars().all(character_is_valid)
}

/// Whether `representation` is a well-formed, non-empty string of dots and
/// dashes. This does not check that it maps to a character.
pub fn representation_is_valid(representation: &str) -> bool {
    !representation.is_empty() && representation.chars().all(|c| c == DOT || c == DASH)
}

/// All characters the engine can send, sorted.
pub fn supported_characters() -> Vec<char> {
    let mut chars: Vec<char> = CHARACTERS.keys().copied().collect();
    chars.push(' ');
    chars.sort_unstable();
    chars
}

/// The NATO phonetic for a letter, e.g. `'a'` → `"Alfa"`.
pub fn phonetic(c: char) -> Option<&'static str> {
    let key = lookup_key(c);
    key.is_ascii_uppercase()
        .then(|| PHONETICS[(key as u8 - b'A') as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_round_trip() {
        for c in 'A'..='Z' {
            let representation = character_to_representation(c).unwrap();
            assert_eq!(representation_to_character(representation), Some(c));
        }
    }

    #[test]
    fn full_alphabet_round_trips_except_shared_accents() {
        for c in supported_characters() {
            if c == ' ' || c == 'Å' {
                // Space has no representation; Å shares one with À.
                continue;
            }
            let representation = character_to_representation(c).unwrap();
            assert_eq!(
                representation_to_character(representation),
                Some(c),
                "character {c:?}"
            );
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(character_to_representation('q'), Some("--.-"));
        assert_eq!(character_to_representation('Q'), Some("--.-"));
    }

    #[test]
    fn procedural_signs() {
        assert_eq!(character_to_representation('<'), Some("...-.-")); // VA
        assert_eq!(character_to_representation('>'), Some("-...-.-")); // BK
        assert_eq!(character_to_representation('!'), Some("...-.")); // SN
        assert_eq!(character_to_representation('&'), Some(".-...")); // AS
        assert_eq!(character_to_representation('^'), Some("-.-.-")); // KA
        assert_eq!(character_to_representation('~'), Some(".-.-..")); // AL
    }

    #[test]
    fn space_is_valid_but_unmapped() {
        assert!(character_is_valid(' '));
        assert_eq!(character_to_representation(' '), None);
    }

    #[test]
    fn representation_validation() {
        assert!(representation_is_valid(".-"));
        assert!(representation_is_valid("-----"));
        assert!(!representation_is_valid(""));
        assert!(!representation_is_valid(".-x"));
    }

    #[test]
    fn unknown_representation() {
        assert_eq!(representation_to_character("........"), None);
    }

    #[test]
    fn phonetics() {
        assert_eq!(phonetic('a'), Some("Alfa"));
        assert_eq!(phonetic('Z'), Some("Zulu"));
        assert_eq!(phonetic('3'), None);
    }

    #[test]
    fn string_validation() {
        assert!(string_is_valid("CQ CQ DE N0ONE"));
        assert!(string_is_valid("déjà vu"));
        assert!(!string_is_valid("100%"));
    }
}

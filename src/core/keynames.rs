//! Human-readable names for key identifiers.

use crate::collector::types::KeyId;

static KEY_NAMES: phf::Map<u16, &'static str> = phf::phf_map! {
    0u16 => "A",
    1u16 => "S",
    2u16 => "D",
    3u16 => "F",
    4u16 => "H",
    5u16 => "G",
    6u16 => "Z",
    7u16 => "X",
    8u16 => "C",
    9u16 => "V",
    10u16 => "§",
    11u16 => "B",
    12u16 => "Q",
    13u16 => "W",
    14u16 => "E",
    15u16 => "R",
    16u16 => "Y",
    17u16 => "T",
    18u16 => "1",
    19u16 => "2",
    20u16 => "3",
    21u16 => "4",
    22u16 => "6",
    23u16 => "5",
    24u16 => "=",
    25u16 => "9",
    26u16 => "7",
    27u16 => "-",
    28u16 => "8",
    29u16 => "0",
    30u16 => "]",
    31u16 => "O",
    32u16 => "U",
    33u16 => "[",
    34u16 => "I",
    35u16 => "P",
    36u16 => "Return",
    37u16 => "L",
    38u16 => "J",
    39u16 => "'",
    40u16 => "K",
    41u16 => ";",
    42u16 => "\\",
    43u16 => ",",
    44u16 => "/",
    45u16 => "N",
    46u16 => "M",
    47u16 => ".",
    48u16 => "Tab",
    49u16 => "Space",
    50u16 => "`",
    51u16 => "Delete",
    52u16 => "Enter",
    53u16 => "Escape",
    54u16 => "Right Command",
    55u16 => "Command",
    56u16 => "Shift",
    57u16 => "Caps Lock",
    58u16 => "Option",
    59u16 => "Control",
    60u16 => "Right Shift",
    61u16 => "Right Option",
    62u16 => "Right Control",
    63u16 => "Fn",
    64u16 => "F17",
    65u16 => "Keypad .",
    67u16 => "Keypad *",
    69u16 => "Keypad +",
    71u16 => "Keypad Clear",
    72u16 => "Volume Up",
    73u16 => "Volume Down",
    74u16 => "Mute",
    75u16 => "Keypad /",
    76u16 => "Keypad Enter",
    78u16 => "Keypad -",
    79u16 => "F18",
    80u16 => "F19",
    81u16 => "Keypad =",
    82u16 => "Keypad 0",
    83u16 => "Keypad 1",
    84u16 => "Keypad 2",
    85u16 => "Keypad 3",
    86u16 => "Keypad 4",
    87u16 => "Keypad 5",
    88u16 => "Keypad 6",
    89u16 => "Keypad 7",
    90u16 => "F20",
    91u16 => "Keypad 8",
    92u16 => "Keypad 9",
    96u16 => "F5",
    97u16 => "F6",
    98u16 => "F7",
    99u16 => "F3",
    100u16 => "F8",
    101u16 => "F9",
    103u16 => "F11",
    105u16 => "F13",
    106u16 => "F16",
    107u16 => "F14",
    109u16 => "F10",
    111u16 => "F12",
    113u16 => "F15",
    114u16 => "Help",
    115u16 => "Home",
    116u16 => "Page Up",
    117u16 => "Forward Delete",
    118u16 => "F4",
    119u16 => "End",
    120u16 => "F2",
    121u16 => "Page Down",
    122u16 => "F1",
    123u16 => "Left Arrow",
    124u16 => "Right Arrow",
    125u16 => "Down Arrow",
    126u16 => "Up Arrow",
};

/// Look up the name of a key, if it is a known key.
pub fn key_name(key_id: KeyId) -> Option<&'static str> {
    KEY_NAMES.get(&key_id).copied()
}

/// Name of a key for display, falling back to its numeric identifier.
pub fn display_name(key_id: KeyId) -> String {
    match key_name(key_id) {
        Some(name) => name.to_string(),
        None => format!("Key #{key_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_keys() {
        assert_eq!(key_name(49), Some("Space"));
        assert_eq!(key_name(51), Some("Delete"));
        assert_eq!(key_name(0), Some("A"));
        assert_eq!(key_name(126), Some("Up Arrow"));
    }

    #[test]
    fn test_unknown_key_falls_back() {
        assert_eq!(key_name(300), None);
        assert_eq!(display_name(300), "Key #300");
        assert_eq!(display_name(36), "Return");
    }
}

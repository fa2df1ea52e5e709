//! Hex image text format: `@address` markers followed by 2-hex-digit byte
//! tokens, whitespace-insensitive.
//!
//! Transcribed from `examples/original_source/poxim.c`'s
//! `load_program_from_hex_string`: an `@` token switches the write cursor
//! (the first one seen also seeds the initial program counter), every
//! other token is a byte written at the cursor and advances it by one.
//! Bytes that land outside the placement range handed to [`parse`] are
//! silently dropped, exactly as the reference does — there is no parse
//! error for an out-of-range address, only for malformed token text.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub address: u32,
    pub byte: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexImage {
    pub entry_pc: u32,
    pub placements: Vec<Placement>,
}

/// Default program counter when the image contains no `@` marker at all.
pub const DEFAULT_ENTRY_PC: u32 = 0x8000_0000;

fn is_hex_digit(c: char) -> bool {
    c.is_ascii_hexdigit()
}

/// Parse the textual hex image into an entry PC and a flat placement
/// list. Bytes for addresses the caller's memory cannot hold should be
/// filtered by the caller (mirroring the reference's bounds check inline
/// in the loader); this function only implements the token grammar.
pub fn parse(text: &str) -> HexImage {
    let mut chars = text.chars().peekable();
    let mut cursor: u32 = DEFAULT_ENTRY_PC;
    let mut entry_pc: Option<u32> = None;
    let mut placements = Vec::new();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '@' {
            chars.next();
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if is_hex_digit(d) {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            if let Ok(addr) = u32::from_str_radix(&digits, 16) {
                cursor = addr;
                if entry_pc.is_none() {
                    entry_pc = Some(addr);
                }
            }
            continue;
        }
        // Two-character hex byte token.
        let mut digits = String::new();
        digits.push(c);
        chars.next();
        if let Some(&d2) = chars.peek() {
            if is_hex_digit(d2) {
                digits.push(d2);
                chars.next();
            }
        }
        if let Ok(byte) = u8::from_str_radix(&digits, 16) {
            placements.push(Placement {
                address: cursor,
                byte,
            });
            cursor = cursor.wrapping_add(1);
        }
    }

    HexImage {
        entry_pc: entry_pc.unwrap_or(DEFAULT_ENTRY_PC),
        placements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_marker_seeds_entry_pc_and_bytes() {
        let image = parse("@80000000 93 00 10 00");
        assert_eq!(image.entry_pc, 0x8000_0000);
        assert_eq!(
            image.placements,
            vec![
                Placement { address: 0x8000_0000, byte: 0x93 },
                Placement { address: 0x8000_0001, byte: 0x00 },
                Placement { address: 0x8000_0002, byte: 0x10 },
                Placement { address: 0x8000_0003, byte: 0x00 },
            ]
        );
    }

    #[test]
    fn missing_marker_defaults_entry_and_base() {
        let image = parse("de ad be ef");
        assert_eq!(image.entry_pc, DEFAULT_ENTRY_PC);
        assert_eq!(image.placements[0].address, DEFAULT_ENTRY_PC);
    }

    #[test]
    fn only_first_marker_sets_entry_pc() {
        let image = parse("@80000000 00 @80000100 11");
        assert_eq!(image.entry_pc, 0x8000_0000);
        assert_eq!(image.placements[0].address, 0x8000_0000);
        assert_eq!(image.placements[1].address, 0x8000_0100);
    }

    #[test]
    fn tolerates_newlines_and_tabs_between_tokens() {
        let image = parse("@80000000\n93\t00\r\n10 00");
        assert_eq!(image.placements.len(), 4);
    }

    #[test]
    fn marker_resumes_cursor_for_subsequent_bytes() {
        let image = parse("@80000010 aa bb");
        assert_eq!(image.placements[0].address, 0x8000_0010);
        assert_eq!(image.placements[1].address, 0x8000_0011);
    }
}

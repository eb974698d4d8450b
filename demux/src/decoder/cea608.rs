//! CEA-608 pop-on captions of channel 1.
//!
//! Input samples are runs of `(header, cc1, cc2)` triplets. Only field 1
//! pairs are used. Captions are composed off screen after RCL and shown when
//! EOC swaps the two memories.

use super::captions::{Cue, CueParser};

const TRIPLET_SIZE: usize = 3;
const CC_VALID_FLAG: u8 = 0x04;
const CC_TYPE_MASK: u8 = 0x03;
const NTSC_CC_FIELD_1: u8 = 0x00;

/// First byte of the channel 1 miscellaneous control codes.
const CTRL_MISC_CHAN_1: u8 = 0x14;
const CTRL_RESUME_CAPTION_LOADING: u8 = 0x20;
const CTRL_BACKSPACE: u8 = 0x21;
const CTRL_ERASE_DISPLAYED_MEMORY: u8 = 0x2C;
const CTRL_CARRIAGE_RETURN: u8 = 0x2D;
const CTRL_ERASE_NON_DISPLAYED_MEMORY: u8 = 0x2E;
const CTRL_END_OF_CAPTION: u8 = 0x2F;

/// Characters of the basic set that differ from ASCII.
fn basic_char(code: u8) -> char {
    match code {
        0x2A => 'á',
        0x5C => 'é',
        0x5E => 'í',
        0x5F => 'ó',
        0x60 => 'ú',
        0x7B => 'ç',
        0x7C => '÷',
        0x7D => 'Ñ',
        0x7E => 'ñ',
        0x7F => '█',
        code => code as char,
    }
}

const SPECIAL_CHARS: [char; 16] = [
    '®', '°', '½', '¿', '™', '¢', '£', '♪', 'à', ' ', 'è', 'â', 'ê', 'î', 'ô', 'û',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptionMode {
    Unknown,
    PopOn,
}

#[derive(Debug)]
pub struct Cea608Parser {
    mode: CaptionMode,
    /// Caption being composed off screen.
    non_displayed: Vec<String>,
    displayed: Vec<String>,
    last_control: Option<(u8, u8)>,
    cues_changed: bool,
}

impl Default for Cea608Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Cea608Parser {
    pub fn new() -> Self {
        Self {
            mode: CaptionMode::Unknown,
            non_displayed: vec![String::new()],
            displayed: Vec::new(),
            last_control: None,
            cues_changed: false,
        }
    }

    fn current_row(&mut self) -> &mut String {
        if self.non_displayed.is_empty() {
            self.non_displayed.push(String::new());
        }
        let last = self.non_displayed.len() - 1;
        &mut self.non_displayed[last]
    }

    fn push_char(&mut self, c: char) {
        if self.mode == CaptionMode::PopOn {
            self.current_row().push(c);
        }
    }

    fn new_row(&mut self) {
        if self.non_displayed.last().is_some_and(|row| !row.is_empty()) {
            self.non_displayed.push(String::new());
        }
    }

    fn handle_misc_control(&mut self, cc2: u8) {
        match cc2 {
            CTRL_RESUME_CAPTION_LOADING => self.mode = CaptionMode::PopOn,
            CTRL_BACKSPACE => {
                self.current_row().pop();
            }
            CTRL_CARRIAGE_RETURN => self.new_row(),
            CTRL_ERASE_DISPLAYED_MEMORY => {
                if !self.displayed.is_empty() {
                    self.displayed.clear();
                    self.cues_changed = true;
                }
            }
            CTRL_ERASE_NON_DISPLAYED_MEMORY => self.non_displayed = vec![String::new()],
            CTRL_END_OF_CAPTION => {
                let composed: Vec<String> = self
                    .non_displayed
                    .iter()
                    .map(|row| row.trim_end().to_string())
                    .filter(|row| !row.is_empty())
                    .collect();
                self.non_displayed = std::mem::take(&mut self.displayed);
                if self.non_displayed.is_empty() {
                    self.non_displayed.push(String::new());
                }
                self.displayed = composed;
                self.cues_changed = true;
            }
            other => log::trace!("Ignoring CEA-608 control code 0x14{other:02X}"),
        }
    }

    fn handle_pair(&mut self, cc1: u8, cc2: u8) {
        let is_control = (0x10..=0x1F).contains(&cc1);
        if !is_control {
            self.last_control = None;
            if cc1 >= 0x20 {
                self.push_char(basic_char(cc1));
            }
            if cc2 >= 0x20 {
                self.push_char(basic_char(cc2));
            }
            return;
        }

        // Control codes are sent twice for robustness.
        if self.last_control == Some((cc1, cc2)) {
            self.last_control = None;
            return;
        }
        self.last_control = Some((cc1, cc2));

        match (cc1, cc2) {
            (CTRL_MISC_CHAN_1, 0x20..=0x2F) => self.handle_misc_control(cc2),
            // Special characters.
            (0x11, 0x30..=0x3F) => self.push_char(SPECIAL_CHARS[(cc2 & 0x0F) as usize]),
            // Mid-row codes show as a space.
            (0x11, 0x20..=0x2F) => self.push_char(' '),
            // Preamble address codes start a new row.
            (0x10..=0x17, 0x40..=0x7F) => self.new_row(),
            _ => log::trace!("Ignoring CEA-608 pair {cc1:02X} {cc2:02X}"),
        }
    }
}

impl CueParser for Cea608Parser {
    fn decode(&mut self, data: &[u8], _time_us: i64) {
        for triplet in data.chunks_exact(TRIPLET_SIZE) {
            let header = triplet[0];
            if header & CC_VALID_FLAG == 0 || header & CC_TYPE_MASK != NTSC_CC_FIELD_1 {
                continue;
            }
            // Strip the parity bits.
            let cc1 = triplet[1] & 0x7F;
            let cc2 = triplet[2] & 0x7F;
            if cc1 == 0 && cc2 == 0 {
                continue;
            }
            self.handle_pair(cc1, cc2);
        }
    }

    fn take_new_cues(&mut self) -> Option<Vec<Cue>> {
        if !std::mem::take(&mut self.cues_changed) {
            return None;
        }
        if self.displayed.is_empty() {
            return Some(Vec::new());
        }
        Some(vec![Cue {
            text: self.displayed.join("\n"),
        }])
    }

    fn flush(&mut self) {
        *self = Self::new();
    }
}

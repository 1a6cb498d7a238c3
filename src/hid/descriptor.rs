//! Report byte lengths derived from a HID report descriptor.
//!
//! Only the sizes of Input and Output reports are computed, using the same rules as Windows'
//! `HidP_GetCaps`: the longest report of each kind, plus one byte for the report ID, which is
//! counted even when the device does not number its reports.

use std::collections::BTreeMap;
use std::fmt::Display;
use thiserror::Error;

const LONG_ITEM_PREFIX: u8 = 0xfe;

// Item tags with the size bits masked off.
const TAG_INPUT: u8 = 0x80;
const TAG_OUTPUT: u8 = 0x90;
const TAG_FEATURE: u8 = 0xb0;
const TAG_REPORT_SIZE: u8 = 0x74;
const TAG_REPORT_ID: u8 = 0x84;
const TAG_REPORT_COUNT: u8 = 0x94;
const TAG_PUSH: u8 = 0xa4;
const TAG_POP: u8 = 0xb4;

/// Byte lengths of a device's input and output reports, including the report ID byte.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportLengths {
    pub input: u16,
    pub output: u16,
}

impl Display for ReportLengths {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "in {} / out {} bytes", self.input, self.output)
    }
}

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum DescriptorError {
    #[error("item at offset {offset} runs past the end of the descriptor")]
    Truncated { offset: usize },

    #[error("Pop item at offset {offset} has no matching Push")]
    UnbalancedPop { offset: usize },

    #[error("report length overflows 16 bits")]
    TooLong,
}

#[derive(Copy, Clone, Default)]
struct Globals {
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ReportKind {
    Input,
    Output,
    Feature,
}

/// Walk `desc` and compute the longest input and output report it declares.
pub fn report_lengths(desc: &[u8]) -> Result<ReportLengths, DescriptorError> {
    let mut globals = Globals::default();
    let mut stack = Vec::new();
    let mut bits: BTreeMap<(ReportKind, u8), u64> = BTreeMap::new();

    let mut i = 0;
    while i < desc.len() {
        let prefix = desc[i];

        if prefix == LONG_ITEM_PREFIX {
            let data_size = *desc.get(i + 1).ok_or(DescriptorError::Truncated { offset: i })?;
            i += 3 + data_size as usize;
            if i > desc.len() {
                return Err(DescriptorError::Truncated { offset: i });
            }
            continue;
        }

        let size = match prefix & 0x03 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        let data = desc
            .get(i + 1..i + 1 + size)
            .ok_or(DescriptorError::Truncated { offset: i })?;
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32);

        let kind = match prefix & 0xfc {
            TAG_INPUT => Some(ReportKind::Input),
            TAG_OUTPUT => Some(ReportKind::Output),
            TAG_FEATURE => Some(ReportKind::Feature),
            TAG_REPORT_SIZE => {
                globals.report_size = value;
                None
            }
            TAG_REPORT_COUNT => {
                globals.report_count = value;
                None
            }
            TAG_REPORT_ID => {
                globals.report_id = value as u8;
                None
            }
            TAG_PUSH => {
                stack.push(globals);
                None
            }
            TAG_POP => {
                globals = stack
                    .pop()
                    .ok_or(DescriptorError::UnbalancedPop { offset: i })?;
                None
            }
            _ => None,
        };

        if let Some(kind) = kind {
            *bits.entry((kind, globals.report_id)).or_default() +=
                globals.report_size as u64 * globals.report_count as u64;
        }

        i += 1 + size;
    }

    Ok(ReportLengths {
        input: longest(&bits, ReportKind::Input)?,
        output: longest(&bits, ReportKind::Output)?,
    })
}

fn longest(bits: &BTreeMap<(ReportKind, u8), u64>, kind: ReportKind) -> Result<u16, DescriptorError> {
    let max_bits = bits
        .iter()
        .filter(|((k, _), _)| *k == kind)
        .map(|(_, &b)| b)
        .max();

    match max_bits {
        None => Ok(0),
        Some(b) => u16::try_from(b.div_ceil(8) + 1).map_err(|_| DescriptorError::TooLong),
    }
}

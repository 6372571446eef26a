//! Predecoded execution segments.
//!
//! Decoding the same instruction words over and over is the interpreter's
//! main overhead. A `DecodedSegment` holds every word of an executable range
//! already decoded; once installed, the machine fetches from it instead of
//! decoding from memory. The observable behaviour is identical: words that
//! do not decode stay illegal and raise the same exception.
//!
//! Building a segment for a large program takes a while, so
//! `BackgroundTranslation` does it on a worker thread. The machine keeps
//! interpreting until the caller installs the finished segment between
//! calls.

use std::sync::mpsc;
use std::thread;

use crate::decoder::decode;
use crate::instruction::Instruction;

#[derive(Debug, Clone)]
pub struct DecodedSegment {
    base: u32,
    /// `Err(word)` for words that do not decode.
    instructions: Vec<Result<Instruction, u32>>,
}

impl DecodedSegment {
    pub fn decode(base: u32, code: &[u8]) -> Self {
        let instructions = code
            .chunks_exact(4)
            .map(|w| {
                let word = u32::from_le_bytes([w[0], w[1], w[2], w[3]]);
                decode(word).ok_or(word)
            })
            .collect();
        Self { base, instructions }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn end(&self) -> u32 {
        self.base.wrapping_add(self.instructions.len() as u32 * 4)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// `None` when `pc` is outside the segment or misaligned.
    #[inline]
    pub fn get(&self, pc: u32) -> Option<Result<Instruction, u32>> {
        let offset = pc.checked_sub(self.base)?;
        if offset & 3 != 0 {
            return None;
        }
        self.instructions.get((offset / 4) as usize).copied()
    }
}

/// A segment being decoded on a worker thread.
#[derive(Debug)]
pub struct BackgroundTranslation {
    receiver: mpsc::Receiver<DecodedSegment>,
    ready: Option<DecodedSegment>,
}

impl BackgroundTranslation {
    pub fn spawn(base: u32, code: Vec<u8>) -> Self {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let segment = DecodedSegment::decode(base, &code);
            log::debug!("translated {} instructions at 0x{:08x}", segment.len(), base);
            // The receiver may already be gone if the sandbox was dropped.
            let _ = sender.send(segment);
        });
        Self { receiver, ready: None }
    }

    /// Non-blocking: the finished segment, once the worker is done.
    pub fn try_take(&mut self) -> Option<DecodedSegment> {
        if self.ready.is_none() {
            self.ready = self.receiver.try_recv().ok();
        }
        self.ready.take()
    }

    /// Blocks until the worker is done. `None` if it died.
    pub fn wait(self) -> Option<DecodedSegment> {
        self.ready.or_else(|| self.receiver.recv().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;

    #[test]
    fn lookup_by_pc() {
        let words = [encode(&Instruction::Ecall).unwrap(), 0, encode(&Instruction::Stop).unwrap()];
        let code: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let seg = DecodedSegment::decode(0x1000, &code);
        assert_eq!(seg.get(0x1000), Some(Ok(Instruction::Ecall)));
        assert_eq!(seg.get(0x1004), Some(Err(0)));
        assert_eq!(seg.get(0x1008), Some(Ok(Instruction::Stop)));
        assert_eq!(seg.get(0x100c), None);
        assert_eq!(seg.get(0x0ffc), None);
        assert_eq!(seg.get(0x1002), None);
    }

    #[test]
    fn background_result_matches_foreground() {
        let code: Vec<u8> = encode(&Instruction::Ebreak).unwrap().to_le_bytes().to_vec();
        let job = BackgroundTranslation::spawn(0x2000, code.clone());
        let seg = job.wait().unwrap();
        assert_eq!(seg.get(0x2000), DecodedSegment::decode(0x2000, &code).get(0x2000));
    }
}

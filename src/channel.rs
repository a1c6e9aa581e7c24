// coroio
//
// The software is released under the MIT license. see LICENSE.txt

// Single-slot handoff between a resume task and the frame it re-enters.
// Written at most once per suspend/resume cycle, read exactly once by the
// resumed frame. Both ends run on the owning context, so no locking lives
// here; the coroutine's own mutex covers the slot.

use std::any::Any;
use std::io;

pub enum Outcome {
    Value(Box<dyn Any + Send>),
    Failure(io::Error),
}

pub struct ResultChannel {
    slot: Option<Outcome>,
}

impl ResultChannel {
    pub fn new() -> Self {
        ResultChannel { slot: None }
    }

    pub fn write(&mut self, outcome: Outcome) {
        assert!(
            self.slot.is_none(),
            "result channel written twice between a suspend and its resume"
        );
        self.slot = Some(outcome);
    }

    pub fn read_and_clear(&mut self) -> Outcome {
        self.slot
            .take()
            .expect("result channel read before any resume wrote it")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut chan = ResultChannel::new();
        chan.write(Outcome::Value(Box::new(5i32)));
        match chan.read_and_clear() {
            Outcome::Value(v) => assert_eq!(*v.downcast::<i32>().unwrap(), 5),
            Outcome::Failure(_) => panic!(),
        }
    }

    #[test]
    fn test_cleared_after_read() {
        let mut chan = ResultChannel::new();
        chan.write(Outcome::Failure(io::Error::new(io::ErrorKind::Other, "E")));
        let _ = chan.read_and_clear();
        chan.write(Outcome::Value(Box::new(())));
        let _ = chan.read_and_clear();
    }

    #[test]
    #[should_panic(expected = "written twice")]
    fn test_double_write() {
        let mut chan = ResultChannel::new();
        chan.write(Outcome::Value(Box::new(1i32)));
        chan.write(Outcome::Value(Box::new(2i32)));
    }

    #[test]
    #[should_panic(expected = "read before any resume")]
    fn test_read_empty() {
        let mut chan = ResultChannel::new();
        let _ = chan.read_and_clear();
    }
}

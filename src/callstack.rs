// coroio
//
// The software is released under the MIT license. see LICENSE.txt

// Identifies which execution contexts the current thread is driving. `run`
// pushes an entry for its context and pops it on the way out; the await
// operator consults `contains` for its cross-context usage check.

use std::cell::RefCell;

thread_local! {
    static STACK: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

pub struct CallStackEntry {
    id: usize,
}

impl CallStackEntry {
    pub fn new(id: usize) -> Self {
        STACK.with(|s| s.borrow_mut().push(id));
        CallStackEntry { id }
    }
}

impl Drop for CallStackEntry {
    fn drop(&mut self) {
        STACK.with(|s| {
            let mut stack = s.borrow_mut();
            let pos = stack
                .iter()
                .rposition(|e| *e == self.id)
                .expect("callstack entry disappeared");
            stack.remove(pos);
        });
    }
}

pub fn contains(id: usize) -> bool {
    STACK.with(|s| s.borrow().iter().any(|e| *e == id))
}

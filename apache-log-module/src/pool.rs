// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Free-lists for objects reused across requests

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use crate::context::LogContext;

const MAX_IDLE_BUFFERS: usize = 256;
const MAX_IDLE_CONTEXTS: usize = 256;

/// Buffers larger than this are shrunk when returned to the pool
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;
const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Line buffers shared by all access logs
pub(crate) static BUFFERS: Pool<Vec<u8>> = Pool::new(MAX_IDLE_BUFFERS);

/// Request contexts shared by all access logs
pub(crate) static CONTEXTS: Pool<LogContext> = Pool::new(MAX_IDLE_CONTEXTS);

/// Objects that can be put back into their initial state for reuse
pub trait Recycle {
    /// Resets the object, keeping any allocations worth reusing
    fn recycle(&mut self);
}

impl Recycle for Vec<u8> {
    fn recycle(&mut self) {
        self.clear();
        if self.capacity() > MAX_RETAINED_CAPACITY {
            self.shrink_to(DEFAULT_BUFFER_CAPACITY);
        }
    }
}

/// A free-list of reusable objects
///
/// Items are either checked out (owned by one [`Pooled`] guard) or idle (owned by the pool).
/// Acquiring from an empty pool creates a new item. At most `max_idle` items are kept, anything
/// returned beyond that is dropped.
#[derive(Debug)]
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T> Pool<T> {
    /// Creates an empty pool keeping at most `max_idle` idle items
    pub const fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Number of idle items
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<T: Recycle + Default> Pool<T> {
    /// Checks out an item, creating a new one if none are idle
    pub fn acquire(&self) -> Pooled<'_, T> {
        let item = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        Pooled {
            pool: self,
            item: Some(item),
        }
    }
}

impl<T: Recycle> Pool<T> {
    fn release(&self, mut item: T) {
        item.recycle();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }
}

/// An item checked out of a [`Pool`], returned to it when dropped
#[derive(Debug)]
pub struct Pooled<'a, T: Recycle> {
    pool: &'a Pool<T>,
    // Only `None` during drop
    item: Option<T>,
}

impl<T: Recycle> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T: Recycle> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T: Recycle> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reuse() {
        let pool = Pool::<Vec<u8>>::new(4);
        assert_eq!(pool.idle(), 0);

        let capacity = {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"hello");
            buf.capacity()
        };
        assert_eq!(pool.idle(), 1);

        let buf = pool.acquire();
        assert_eq!(pool.idle(), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn max_idle() {
        let pool = Pool::<Vec<u8>>::new(2);
        let items: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.idle(), 0);
        drop(items);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn large_buffers_shrink() {
        let pool = Pool::<Vec<u8>>::new(1);
        {
            let mut buf = pool.acquire();
            buf.resize(MAX_RETAINED_CAPACITY * 2, b'x');
        }
        assert!(pool.acquire().capacity() <= MAX_RETAINED_CAPACITY);
    }

    #[test]
    fn contexts_are_reset() {
        let pool = Pool::<LogContext>::new(1);
        {
            let mut ctx = pool.acquire();
            let request = http::Request::builder()
                .uri("/test")
                .header("X-Test", "1")
                .body(())
                .unwrap();
            ctx.begin(&request, std::time::SystemTime::now());
        }
        let ctx = pool.acquire();
        assert!(ctx.request_headers().is_empty());
        assert_eq!(ctx.request_time(), None);
        assert_eq!(ctx.uri().path(), "/");
    }

    #[test]
    fn concurrent_checkout() {
        let pool = Arc::new(Pool::<Vec<u8>>::new(64));
        let threads: Vec<_> = (0..8u8)
            .map(|id| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut buf = pool.acquire();
                        assert!(buf.is_empty());
                        buf.extend_from_slice(&[id; 16]);
                        assert!(buf.iter().all(|byte| *byte == id));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(pool.idle() <= 8);
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::comm::Communicator;
use crate::error::{CollectiveError, CollectiveResult};

/// One posted broadcast, held until every receiver has copied it.
struct Post {
    root: usize,
    data: Arc<Vec<u8>>,
    pending: usize,
}

struct Shared {
    size: usize,
    timeout: Option<Duration>,
    posts: Mutex<HashMap<u64, Post>>,
    posted: Condvar,
}

/// In-process group of `size` members backed by threads.
///
/// Each member gets its own [`LocalComm`]; broadcasts are matched by call
/// order. A root never blocks. A receiver blocks until the matching broadcast
/// is posted, or until the group's timeout elapses.
pub struct LocalGroup;

impl LocalGroup {
    /// Create a group and return one communicator per rank, in rank order.
    pub fn new(size: usize) -> Vec<LocalComm> {
        Self::build(size, None)
    }

    /// Like [`LocalGroup::new`], but receivers give up after `timeout`.
    pub fn with_timeout(size: usize, timeout: Duration) -> Vec<LocalComm> {
        Self::build(size, Some(timeout))
    }

    fn build(size: usize, timeout: Option<Duration>) -> Vec<LocalComm> {
        assert!(size > 0, "group must have at least one member");
        let shared = Arc::new(Shared {
            size,
            timeout,
            posts: Mutex::new(HashMap::new()),
            posted: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                seq: AtomicU64::new(0),
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// One member's view of a [`LocalGroup`].
pub struct LocalComm {
    rank: usize,
    seq: AtomicU64,
    shared: Arc<Shared>,
}

impl LocalComm {
    fn receive(&self, seq: u64, buf: &mut [u8], root: usize) -> CollectiveResult<()> {
        let deadline = self.shared.timeout.map(|t| Instant::now() + t);
        let mut posts = self.shared.posts.lock().expect("lock poisoned");
        let (posted_root, data) = loop {
            if let Some(post) = posts.get_mut(&seq) {
                post.pending -= 1;
                let taken = (post.root, Arc::clone(&post.data));
                if post.pending == 0 {
                    posts.remove(&seq);
                }
                break taken;
            }
            posts = match deadline {
                None => self.shared.posted.wait(posts).expect("lock poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CollectiveError::Timeout {
                            rank: self.rank,
                            root,
                        });
                    }
                    self.shared
                        .posted
                        .wait_timeout(posts, deadline - now)
                        .expect("lock poisoned")
                        .0
                }
            };
        };
        drop(posts);

        if posted_root != root {
            return Err(CollectiveError::RootMismatch {
                rank: self.rank,
                expected: root,
                actual: posted_root,
            });
        }
        if data.len() != buf.len() {
            return Err(CollectiveError::SizeMismatch {
                rank: self.rank,
                sent: data.len(),
                expected: buf.len(),
            });
        }
        buf.copy_from_slice(&data);
        Ok(())
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast(&self, buf: &mut [u8], root: usize) -> CollectiveResult<()> {
        let size = self.shared.size;
        if root >= size {
            return Err(CollectiveError::InvalidRoot { root, size });
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        trace!(rank = self.rank, root, seq, len = buf.len(), "broadcast");
        if size == 1 {
            return Ok(());
        }
        if self.rank != root {
            return self.receive(seq, buf, root);
        }

        let mut posts = self.shared.posts.lock().expect("lock poisoned");
        posts.insert(
            seq,
            Post {
                root,
                data: Arc::new(buf.to_vec()),
                pending: size - 1,
            },
        );
        drop(posts);
        self.shared.posted.notify_all();
        Ok(())
    }
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

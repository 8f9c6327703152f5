// Generic bounded connection pool.
//
// The pool multiplexes framed transports under mixed concurrent demand:
// - at most `max_pool_size` connections alive at once
// - at most `max_connections` leases over the pool's lifetime
// - idle connections past `max_idle_time` are destroyed before reuse
// - acquisition at capacity waits up to `acquire_timeout` then gives up
//
// A lease owns its connection exclusively; release happens on drop, on
// every exit path.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::Result;

/// Implemented by pooled connection types; a member reporting itself
/// invalid is destroyed on release instead of rejoining the idle set.
pub trait PoolMember: Send {
    fn is_valid(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct Configuration {
    /// Connections constructed eagerly when the pool is created.
    pub initial_size: usize,
    /// Ceiling on simultaneously alive connections (idle + leased).
    pub max_pool_size: usize,
    /// Ceiling on total lifetime leases; once reached the pool refuses.
    pub max_connections: u64,
    /// Idle connections older than this are evicted, not reused.
    pub max_idle_time: Duration,
    /// Bounded wait when the pool is saturated.
    pub acquire_timeout: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            initial_size: 1,
            max_pool_size: 10,
            max_connections: 1000,
            max_idle_time: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(1),
        }
    }
}

struct Idle<C> {
    member: C,
    since: Instant,
}

struct State<C> {
    idle: VecDeque<Idle<C>>,
    live: usize,
    leases: u64,
}

type Factory<C> = Box<dyn Fn() -> Result<C> + Send + Sync>;

pub struct Pool<C: PoolMember> {
    factory: Factory<C>,
    config: Configuration,
    state: Mutex<State<C>>,
    available: Condvar,
}

impl<C: PoolMember> Pool<C> {
    pub fn new<F>(factory: F, config: Configuration) -> Arc<Self>
    where
        F: Fn() -> Result<C> + Send + Sync + 'static,
    {
        let pool = Arc::new(Self {
            factory: Box::new(factory),
            config,
            state: Mutex::new(State {
                idle: VecDeque::new(),
                live: 0,
                leases: 0,
            }),
            available: Condvar::new(),
        });

        for _ in 0..pool.config.initial_size {
            match (pool.factory)() {
                Ok(member) => {
                    let mut state = pool.state.lock();
                    state.idle.push_back(Idle {
                        member,
                        since: Instant::now(),
                    });
                    state.live += 1;
                }
                Err(e) => warn!("Error creating initial connection: {}", e),
            }
        }

        pool
    }

    /// Borrow a connection.  Returns `None` on saturation past the wait
    /// bound, on lifetime-lease exhaustion, or when the factory fails.
    pub fn acquire(self: &Arc<Self>) -> Option<Lease<C>> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            if state.leases >= self.config.max_connections {
                warn!(
                    "Pool lease budget exhausted ({})",
                    self.config.max_connections
                );
                return None;
            }

            while let Some(front) = state.idle.front() {
                if front.since.elapsed() > self.config.max_idle_time {
                    state.idle.pop_front();
                    state.live -= 1;
                    debug!("Evicted idle connection past retention");
                } else {
                    break;
                }
            }

            if let Some(entry) = state.idle.pop_front() {
                state.leases += 1;
                return Some(Lease::new(Arc::clone(self), entry.member));
            }

            if state.live < self.config.max_pool_size {
                state.live += 1;
                drop(state);
                match (self.factory)() {
                    Ok(member) => {
                        let mut state = self.state.lock();
                        state.leases += 1;
                        return Some(Lease::new(Arc::clone(self), member));
                    }
                    Err(e) => {
                        warn!("Error creating connection: {}", e);
                        let mut state = self.state.lock();
                        state.live -= 1;
                        drop(state);
                        self.available.notify_one();
                        return None;
                    }
                }
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
    }

    fn release(&self, member: C) {
        {
            let mut state = self.state.lock();
            if member.is_valid() && state.live <= self.config.max_pool_size {
                state.idle.push_back(Idle {
                    member,
                    since: Instant::now(),
                });
            } else {
                state.live -= 1;
            }
        }
        self.available.notify_one();
    }

    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    pub fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn total_leases(&self) -> u64 {
        self.state.lock().leases
    }
}

/// Scoped, exclusive possession of a pooled connection.
pub struct Lease<C: PoolMember> {
    pool: Arc<Pool<C>>,
    member: Option<C>,
}

impl<C: PoolMember> Lease<C> {
    fn new(pool: Arc<Pool<C>>, member: C) -> Self {
        Self {
            pool,
            member: Some(member),
        }
    }
}

impl<C: PoolMember> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        match &self.member {
            Some(member) => member,
            None => unreachable!("lease accessed after release"),
        }
    }
}

impl<C: PoolMember> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut C {
        match &mut self.member {
            Some(member) => member,
            None => unreachable!("lease accessed after release"),
        }
    }
}

impl<C: PoolMember> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(member) = self.member.take() {
            self.pool.release(member);
        }
    }
}

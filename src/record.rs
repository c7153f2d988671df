//! Cached answers, asked questions and the times at which they must be refreshed.
//!
//! Refresh times are pure functions of a timestamp and a retry count. Answers are
//! re-queried at 80, 85, 90 and 95 percent of their TTL, questions are repeated after
//! 1, 2, 4 and 4 seconds. After four retries there is nothing left to schedule.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::message::{RecordData, RecordType, RR};
use crate::name::Name;

pub const ANSWER_REFRESH_PERCENT: [u32; 4] = [80, 85, 90, 95];
pub const QUESTION_REFRESH_SECS: [u64; 4] = [1, 2, 4, 4];

/// When an answer that arrived at `arrival` should be re-queried after `retries` retries.
pub fn answer_refresh(arrival: Instant, ttl: u32, retries: usize) -> Option<Instant> {
    let percent = ANSWER_REFRESH_PERCENT.get(retries)?;
    Some(arrival + Duration::from_secs(ttl as u64) * *percent / 100)
}

/// When a question last asked at `last_asked` should be asked again after `retries` retries.
pub fn question_refresh(last_asked: Instant, retries: usize) -> Option<Instant> {
    let secs = QUESTION_REFRESH_SECS.get(retries)?;
    Some(last_asked + Duration::from_secs(*secs))
}

/// Expiry of an answer. A TTL of zero is a goodbye and lives for one more second.
pub fn answer_expiry(arrival: Instant, ttl: u32) -> Instant {
    let ttl = if ttl == 0 { 1 } else { ttl };
    arrival + Duration::from_secs(ttl as u64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub name: Name,
    pub ttl: u32,
    pub data: RecordData,
    pub cache_flush: bool,
    /// Time of arrival.
    pub arrival: Instant,
    pub retries: usize,
}

impl Answer {
    pub fn new(name: Name, ttl: u32, data: RecordData, cache_flush: bool) -> Self {
        Self::with_arrival(name, ttl, data, cache_flush, Instant::now())
    }

    pub fn with_arrival(
        name: Name,
        ttl: u32,
        data: RecordData,
        cache_flush: bool,
        arrival: Instant,
    ) -> Self {
        Self {
            name,
            ttl,
            data,
            cache_flush,
            arrival,
            retries: 0,
        }
    }

    pub fn from_rr(rr: &RR, arrival: Instant) -> Self {
        Self::with_arrival(
            rr.name.clone(),
            rr.ttl,
            rr.data.clone(),
            rr.cache_flush,
            arrival,
        )
    }

    pub fn rtype(&self) -> RecordType {
        self.data.record_type()
    }

    pub fn refresh(&self) -> Option<Instant> {
        answer_refresh(self.arrival, self.ttl, self.retries)
    }

    pub fn expiry(&self) -> Instant {
        answer_expiry(self.arrival, self.ttl)
    }

    pub fn expired_at(&self, now: Instant) -> bool {
        now > self.expiry()
    }

    pub fn expired(&self) -> bool {
        self.expired_at(Instant::now())
    }

    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) ", self.name, self.ttl)?;
        if self.cache_flush {
            write!(f, "!")?;
        }
        if self.is_goodbye() {
            write!(f, "-")?;
        }
        write!(f, " {}", self.data)
    }
}

/// A question this host or another host on the link has asked.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub name: Name,
    pub rtype: RecordType,
    pub last_asked: Instant,
    pub retries: usize,
}

impl Question {
    pub fn new(name: Name, rtype: RecordType) -> Self {
        Self::asked_at(name, rtype, Instant::now())
    }

    pub fn asked_at(name: Name, rtype: RecordType, last_asked: Instant) -> Self {
        Self {
            name,
            rtype,
            last_asked,
            retries: 0,
        }
    }

    /// Record that the question was seen on the link again, whoever asked it.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    pub fn update_at(&mut self, now: Instant) {
        self.retries += 1;
        self.last_asked = now;
    }

    pub fn refresh(&self) -> Option<Instant> {
        question_refresh(self.last_asked, self.retries)
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.name, self.rtype, self.retries)
    }
}

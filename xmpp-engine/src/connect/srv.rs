//! Ordering of SRV answers into connection attempt order
//!
//! Records are grouped by ascending priority; inside a group targets are
//! drawn by weighted random selection without replacement, with weight-0
//! targets only drawn once no positive-weight target is left.

use core::fmt;
use std::collections::VecDeque;
use std::net::IpAddr;

use log::{debug, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::connect::dns::SrvRecordSource;
use crate::normalize::{normalize, NormalizationKind};
use crate::Error;

/// A decoded SRV resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    /// Lower is tried first
    pub priority: u16,
    /// Relative selection weight among records of equal priority
    pub weight: u16,
    /// TCP port
    pub port: u16,
    /// Target host name, without the trailing dot
    pub target: String,
}

impl SrvRecord {
    /// Build a record from its four fields.
    pub fn new(priority: u16, weight: u16, port: u16, target: &str) -> Self {
        SrvRecord {
            priority,
            weight,
            port,
            target: target.trim_end_matches('.').to_owned(),
        }
    }

    // A target of "." means the service is decidedly not available there.
    fn is_usable(&self) -> bool {
        !self.target.is_empty()
    }
}

/// One candidate host to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    /// Priority of the originating record
    pub priority: u16,
    /// Weight of the originating record
    pub weight: u16,
    /// TCP port
    pub port: u16,
    /// Host name or IP literal
    pub host: String,
}

impl SrvTarget {
    /// Target used when no usable SRV record exists.
    pub fn fallback(domain: &str, port: u16) -> Self {
        SrvTarget {
            priority: 0,
            weight: 0,
            port,
            host: domain.to_owned(),
        }
    }
}

impl From<SrvRecord> for SrvTarget {
    fn from(record: SrvRecord) -> Self {
        SrvTarget {
            priority: record.priority,
            weight: record.weight,
            port: record.port,
            host: record.target,
        }
    }
}

impl fmt::Display for SrvTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// SRV resolution did not produce any usable answer and the resolver fell
/// back to connecting to the domain directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionDegraded {
    /// The domain that was looked up
    pub domain: String,
    /// Why no record was usable
    pub reason: String,
}

impl fmt::Display for ResolutionDegraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no usable SRV records for {}: {}",
            self.domain, self.reason
        )
    }
}

// Selection state of one target. `accumulated_weight` is recomputed on
// every draw.
struct Candidate {
    target: SrvTarget,
    accumulated_weight: u32,
}

/// Connection attempt order for one lookup.
///
/// This is a lazy iterator: the weighted draw for each position happens
/// when the position is requested, and the sequence cannot be restarted.
pub struct SrvTargets {
    groups: VecDeque<Vec<SrvTarget>>,
    current: Vec<Candidate>,
    rng: StdRng,
    degraded: Option<ResolutionDegraded>,
}

impl SrvTargets {
    /// Order `records` for connection attempts. Falls back to
    /// `(0, 0, fallback_port, domain)` if none of them is usable.
    pub fn from_records(
        records: Vec<SrvRecord>,
        domain: &str,
        fallback_port: u16,
        rng: StdRng,
    ) -> Self {
        let mut usable: Vec<SrvRecord> =
            records.into_iter().filter(SrvRecord::is_usable).collect();
        if usable.is_empty() {
            return Self::degraded(
                SrvTarget::fallback(domain, fallback_port),
                ResolutionDegraded {
                    domain: domain.to_owned(),
                    reason: "no usable records".to_owned(),
                },
            );
        }
        // Stable sort keeps the answer order inside a priority, which is
        // the tie-break for weight-0 targets.
        usable.sort_by_key(|record| record.priority);

        let mut groups: VecDeque<Vec<SrvTarget>> = VecDeque::new();
        for record in usable {
            match groups.back_mut() {
                Some(group) if group[0].priority == record.priority => group.push(record.into()),
                _ => groups.push_back(vec![record.into()]),
            }
        }

        SrvTargets {
            groups,
            current: Vec::new(),
            rng,
            degraded: None,
        }
    }

    /// A sequence holding exactly one target.
    pub fn single(target: SrvTarget) -> Self {
        SrvTargets {
            groups: VecDeque::from([vec![target]]),
            current: Vec::new(),
            rng: StdRng::seed_from_u64(0),
            degraded: None,
        }
    }

    fn degraded(target: SrvTarget, degraded: ResolutionDegraded) -> Self {
        let mut targets = Self::single(target);
        targets.degraded = Some(degraded);
        targets
    }

    /// Set if the lookup fell back to the bare domain.
    pub fn degraded_reason(&self) -> Option<&ResolutionDegraded> {
        self.degraded.as_ref()
    }

    fn remaining(&self) -> usize {
        self.current.len() + self.groups.iter().map(Vec::len).sum::<usize>()
    }

    fn select(&mut self) -> Option<SrvTarget> {
        if self.current.is_empty() {
            let group = self.groups.pop_front()?;
            self.current = group
                .into_iter()
                .map(|target| Candidate {
                    target,
                    accumulated_weight: 0,
                })
                .collect();
        }

        let mut sum: u32 = 0;
        for candidate in self.current.iter_mut() {
            sum += u32::from(candidate.target.weight);
            candidate.accumulated_weight = sum;
        }

        let index = if sum == 0 {
            // Only weight-0 targets are left: take them in answer order.
            0
        } else {
            // Drawing from 1..=sum gives each positive-weight target exactly
            // `weight` winning values, and weight-0 targets none.
            let draw = self.rng.gen_range(1..=sum);
            self.current
                .iter()
                .position(|candidate| candidate.accumulated_weight >= draw)
                .unwrap_or(0)
        };
        Some(self.current.remove(index).target)
    }
}

impl Iterator for SrvTargets {
    type Item = SrvTarget;

    fn next(&mut self) -> Option<SrvTarget> {
        self.select()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SrvTargets {}

impl fmt::Debug for SrvTargets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrvTargets")
            .field("remaining", &self.remaining())
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Turns a domain into its ordered candidate targets.
///
/// The resolver owns its record source; no state is shared between
/// lookups.
#[derive(Debug, Clone)]
pub struct SrvResolver<S> {
    source: S,
    seed: Option<u64>,
}

impl<S: SrvRecordSource> SrvResolver<S> {
    /// Resolver querying `source`.
    pub fn new(source: S) -> Self {
        SrvResolver { source, seed: None }
    }

    /// Use a fixed seed for the weighted selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Look up `<service>.<domain>` and order the answers.
    ///
    /// Lookup failures do not fail the resolution: they degrade to the
    /// single fallback target. Only a domain rejected by IDNA conversion
    /// is an error.
    pub async fn resolve(
        &self,
        domain: &str,
        service: &str,
        fallback_port: u16,
    ) -> Result<SrvTargets, Error> {
        let ascii_domain = normalize(NormalizationKind::IdnaToAscii, domain)?;

        if let Ok(ip) = ascii_domain.parse::<IpAddr>() {
            debug!("{} is an IP literal, skipping SRV lookup", ip);
            return Ok(SrvTargets::single(SrvTarget::fallback(
                &ip.to_string(),
                fallback_port,
            )));
        }

        let srv_domain = format!("{}.{}.", service, ascii_domain);
        let targets = match self.source.lookup(&srv_domain).await {
            Ok(records) => {
                debug!("{} SRV records for {}", records.len(), srv_domain);
                SrvTargets::from_records(records, &ascii_domain, fallback_port, self.rng())
            }
            Err(e) => SrvTargets::degraded(
                SrvTarget::fallback(&ascii_domain, fallback_port),
                ResolutionDegraded {
                    domain: ascii_domain.to_string(),
                    reason: e.to_string(),
                },
            ),
        };
        if let Some(degraded) = targets.degraded_reason() {
            warn!("{}, connecting to the domain directly", degraded);
        }
        Ok(targets)
    }
}

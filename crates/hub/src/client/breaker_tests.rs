// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn closed_admits_calls() {
    let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.try_acquire());
}

#[test]
fn opens_at_failure_threshold() {
    let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Closed);
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(!breaker.try_acquire());
}

#[test]
fn success_resets_consecutive_count() {
    let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[test]
fn half_open_admits_exactly_one_probe() {
    let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    // Recovery timeout of zero: the next acquire flips to half-open.
    assert!(breaker.try_acquire());
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    // The concurrent second call is rejected while the probe is in flight.
    assert!(!breaker.try_acquire());
}

#[test]
fn probe_success_closes() {
    let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
    breaker.record_failure();
    assert!(breaker.try_acquire());
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.try_acquire());
}

#[test]
fn probe_failure_reopens() {
    let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
    breaker.record_failure();
    assert!(breaker.try_acquire());
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[test]
fn open_rejects_before_recovery_timeout() {
    let breaker = CircuitBreaker::new(1, Duration::from_secs(300));
    breaker.record_failure();
    assert!(!breaker.try_acquire());
    assert!(!breaker.try_acquire());
    assert_eq!(breaker.state(), BreakerState::Open);
}

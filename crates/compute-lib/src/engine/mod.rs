//! Pure numeric functions behind the compute API
//!
//! Every function is a deterministic mapping from small integer inputs to an
//! arbitrary-precision value. Domain validation lives here; the messages are
//! part of the API surface and are returned to callers verbatim.

use num_bigint::BigInt;
use num_traits::{One, Pow, Zero};
use thiserror::Error;

use crate::models::{Operation, Parameters};

/// A mathematically invalid input, rejected before any work is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Count must be higher than 0")]
    NonPositiveCount,
    #[error("Exponent must be higher than 0")]
    NonPositiveExponent,
}

/// A missing parameter for the requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("missing required parameter: {0}")]
pub struct MissingParameter(pub &'static str);

/// An operation bound to validated arguments, ready to run in a worker.
///
/// The task owns copies of its inputs, so it can cross an isolation boundary
/// without sharing state with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeTask {
    Prime { count: i64 },
    Fibonacci { count: i64 },
    Factorial { count: i64 },
    Power { base: i64, exponent: i64 },
    SumOfNaturals { count: i64 },
}

impl ComputeTask {
    /// Bind `parameters` to `operation`, checking that every required
    /// argument is present. Numeric range validation is left to the engine
    /// functions themselves.
    pub fn from_parameters(
        operation: Operation,
        parameters: &Parameters,
    ) -> Result<Self, MissingParameter> {
        let require = |name: &'static str| parameters.get(name).ok_or(MissingParameter(name));

        Ok(match operation {
            Operation::Prime => ComputeTask::Prime {
                count: require("count")?,
            },
            Operation::Fibonacci => ComputeTask::Fibonacci {
                count: require("count")?,
            },
            Operation::Factorial => ComputeTask::Factorial {
                count: require("count")?,
            },
            Operation::Power => ComputeTask::Power {
                base: require("base")?,
                exponent: require("exponent")?,
            },
            Operation::SumOfNaturals => ComputeTask::SumOfNaturals {
                count: require("count")?,
            },
        })
    }

    pub fn operation(&self) -> Operation {
        match self {
            ComputeTask::Prime { .. } => Operation::Prime,
            ComputeTask::Fibonacci { .. } => Operation::Fibonacci,
            ComputeTask::Factorial { .. } => Operation::Factorial,
            ComputeTask::Power { .. } => Operation::Power,
            ComputeTask::SumOfNaturals { .. } => Operation::SumOfNaturals,
        }
    }

    /// Run the computation to completion.
    pub fn run(&self) -> Result<BigInt, DomainError> {
        match *self {
            ComputeTask::Prime { count } => nth_prime(count),
            ComputeTask::Fibonacci { count } => nth_fibonacci(count),
            ComputeTask::Factorial { count } => factorial(count),
            ComputeTask::Power { base, exponent } => power(base, exponent),
            ComputeTask::SumOfNaturals { count } => sum_of_naturals(count),
        }
    }
}

/// The nth prime number, 1-indexed: prime(1) = 2, prime(5) = 11.
///
/// Trial division against previously found primes, checking odd candidates
/// up to the square root. Unbounded in CPU for large counts, which is why
/// callers run it inside an isolated worker.
pub fn nth_prime(count: i64) -> Result<BigInt, DomainError> {
    if count < 1 {
        return Err(DomainError::NonPositiveCount);
    }
    if count == 1 {
        return Ok(BigInt::from(2));
    }

    let mut primes: Vec<u64> = vec![3];
    let mut remaining = count - 2;
    let mut candidate: u64 = 3;

    while remaining > 0 {
        candidate += 2;
        let limit = (candidate as f64).sqrt() as u64 + 1;
        let mut is_prime = true;
        for &p in &primes {
            if p > limit {
                break;
            }
            if candidate % p == 0 {
                is_prime = false;
                break;
            }
        }
        if is_prime {
            primes.push(candidate);
            remaining -= 1;
        }
    }

    Ok(BigInt::from(*primes.last().unwrap_or(&3)))
}

/// The nth value of the served Fibonacci sequence: fib(1) = 0, fib(2) = 1,
/// fib(10) = 21.
pub fn nth_fibonacci(count: i64) -> Result<BigInt, DomainError> {
    if count < 1 {
        return Err(DomainError::NonPositiveCount);
    }
    if count == 1 {
        return Ok(BigInt::zero());
    }
    if count == 2 {
        return Ok(BigInt::one());
    }

    let mut a = BigInt::zero();
    let mut b = BigInt::one();
    for _ in 3..count {
        let next = &a + &b;
        a = b;
        b = next;
    }

    Ok(b)
}

/// count! — grows past native integer width quickly (21! overflows u64).
pub fn factorial(count: i64) -> Result<BigInt, DomainError> {
    if count < 1 {
        return Err(DomainError::NonPositiveCount);
    }

    let mut result = BigInt::one();
    for i in 2..=count {
        result *= BigInt::from(i);
    }

    Ok(result)
}

/// base raised to exponent; exponent must be at least 1.
pub fn power(base: i64, exponent: i64) -> Result<BigInt, DomainError> {
    if exponent < 1 {
        return Err(DomainError::NonPositiveExponent);
    }

    Ok(Pow::pow(&BigInt::from(base), exponent as u64))
}

/// Sum of the first `count` natural numbers, count * (count + 1) / 2.
pub fn sum_of_naturals(count: i64) -> Result<BigInt, DomainError> {
    if count < 1 {
        return Err(DomainError::NonPositiveCount);
    }

    let n = BigInt::from(count);
    Ok(&n * (&n + BigInt::one()) / BigInt::from(2))
}

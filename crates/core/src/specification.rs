//! Composable, side-effect free predicates.
//!
//! A `Specification<T>` is a pure function `&T -> bool`. Specifications are
//! immutable once built and are combined with `and`, `or`, `not`, and
//! `translate` (which lifts a specification over `U` to one over `T` through
//! a mapping function, e.g. entity -> property value).

use core::marker::PhantomData;

use serde_json::Value as JsonValue;

/// A pure boolean predicate over `T`.
///
/// Implementations must not carry hidden mutable state or perform IO:
/// evaluating the same specification on the same input always yields the
/// same answer.
pub trait Specification<T: ?Sized>: Send + Sync {
    fn satisfied_by(&self, item: &T) -> bool;
}

/// Owned, type-erased specification.
pub type BoxedSpecification<T> = Box<dyn Specification<T>>;

impl<T: ?Sized, F> Specification<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn satisfied_by(&self, item: &T) -> bool {
        self(item)
    }
}

impl<T: ?Sized> Specification<T> for Box<dyn Specification<T>> {
    fn satisfied_by(&self, item: &T) -> bool {
        (**self).satisfied_by(item)
    }
}

/// Conjunction. Stops at the first failing operand; empty is `true`.
pub struct And<T: ?Sized> {
    operands: Vec<BoxedSpecification<T>>,
}

impl<T: ?Sized> Specification<T> for And<T> {
    fn satisfied_by(&self, item: &T) -> bool {
        self.operands.iter().all(|s| s.satisfied_by(item))
    }
}

/// Disjunction. Stops at the first succeeding operand; empty is `false`.
pub struct Or<T: ?Sized> {
    operands: Vec<BoxedSpecification<T>>,
}

impl<T: ?Sized> Specification<T> for Or<T> {
    fn satisfied_by(&self, item: &T) -> bool {
        self.operands.iter().any(|s| s.satisfied_by(item))
    }
}

/// Negation.
pub struct Not<S> {
    inner: S,
}

impl<T: ?Sized, S: Specification<T>> Specification<T> for Not<S> {
    fn satisfied_by(&self, item: &T) -> bool {
        !self.inner.satisfied_by(item)
    }
}

/// Value equality against one of a fixed set of values.
pub struct In<V> {
    values: Vec<V>,
}

impl<V: PartialEq + Send + Sync> Specification<V> for In<V> {
    fn satisfied_by(&self, item: &V) -> bool {
        self.values.iter().any(|v| v == item)
    }
}

/// Presence check for optional values and JSON values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotNull;

impl<U> Specification<Option<U>> for NotNull {
    fn satisfied_by(&self, item: &Option<U>) -> bool {
        item.is_some()
    }
}

impl Specification<JsonValue> for NotNull {
    fn satisfied_by(&self, item: &JsonValue) -> bool {
        !item.is_null()
    }
}

/// Maps the item before delegating to an inner specification.
pub struct Translate<T: ?Sized, U, F, S> {
    function: F,
    inner: S,
    _types: PhantomData<fn(&T) -> U>,
}

impl<T, U, F, S> Specification<T> for Translate<T, U, F, S>
where
    T: ?Sized,
    F: Fn(&T) -> U + Send + Sync,
    S: Specification<U>,
{
    fn satisfied_by(&self, item: &T) -> bool {
        self.inner.satisfied_by(&(self.function)(item))
    }
}

pub fn and<T: ?Sized>(operands: Vec<BoxedSpecification<T>>) -> And<T> {
    And { operands }
}

pub fn or<T: ?Sized>(operands: Vec<BoxedSpecification<T>>) -> Or<T> {
    Or { operands }
}

pub fn not<S>(inner: S) -> Not<S> {
    Not { inner }
}

pub fn in_values<V>(values: impl IntoIterator<Item = V>) -> In<V> {
    In {
        values: values.into_iter().collect(),
    }
}

/// Single-value equality (`in_values` with one value).
pub fn eq<V>(value: V) -> In<V> {
    In {
        values: vec![value],
    }
}

pub fn not_null() -> NotNull {
    NotNull
}

pub fn translate<T, U, F, S>(function: F, inner: S) -> Translate<T, U, F, S>
where
    T: ?Sized,
    F: Fn(&T) -> U + Send + Sync,
    S: Specification<U>,
{
    Translate {
        function,
        inner,
        _types: PhantomData,
    }
}

/// Fluent combinators for any specification.
pub trait SpecificationExt<T: ?Sized>: Specification<T> + Sized + 'static {
    fn and_then<S: Specification<T> + 'static>(self, other: S) -> And<T> {
        and(vec![Box::new(self), Box::new(other)])
    }

    fn or_else<S: Specification<T> + 'static>(self, other: S) -> Or<T> {
        or(vec![Box::new(self), Box::new(other)])
    }

    fn negate(self) -> Not<Self> {
        not(self)
    }

    fn boxed(self) -> BoxedSpecification<T> {
        Box::new(self)
    }
}

impl<T: ?Sized, S: Specification<T> + 'static> SpecificationExt<T> for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn even() -> BoxedSpecification<i64> {
        Box::new(|x: &i64| x % 2 == 0)
    }

    fn positive() -> BoxedSpecification<i64> {
        Box::new(|x: &i64| *x > 0)
    }

    #[test]
    fn and_short_circuits_on_first_failure() {
        let spec = and::<i64>(vec![
            Box::new(|_: &i64| false),
            Box::new(|_: &i64| -> bool { panic!("must not be evaluated") }),
        ]);
        assert!(!spec.satisfied_by(&1));
    }

    #[test]
    fn or_short_circuits_on_first_success() {
        let spec = or::<i64>(vec![
            Box::new(|_: &i64| true),
            Box::new(|_: &i64| -> bool { panic!("must not be evaluated") }),
        ]);
        assert!(spec.satisfied_by(&1));
    }

    #[test]
    fn in_values_uses_value_equality() {
        let spec = in_values(vec!["red".to_string(), "blue".to_string()]);
        assert!(spec.satisfied_by(&"red".to_string()));
        assert!(!spec.satisfied_by(&"green".to_string()));
    }

    #[test]
    fn not_null_on_options_and_json() {
        assert!(not_null().satisfied_by(&Some(1)));
        assert!(!not_null().satisfied_by(&None::<i32>));
        assert!(not_null().satisfied_by(&json!("x")));
        assert!(!not_null().satisfied_by(&JsonValue::Null));
    }

    #[test]
    fn translate_lifts_property_predicates() {
        struct Car {
            color: String,
        }
        let red_car = translate(|c: &Car| c.color.clone(), eq("red".to_string()));
        assert!(red_car.satisfied_by(&Car {
            color: "red".to_string()
        }));
        assert!(!red_car.satisfied_by(&Car {
            color: "blue".to_string()
        }));
    }

    #[test]
    fn fluent_combinators_compose() {
        let spec =
            SpecificationExt::<i64>::and_then(|x: &i64| *x > 10, |x: &i64| *x < 20).negate();
        assert!(spec.satisfied_by(&5));
        assert!(!spec.satisfied_by(&15));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: empty conjunction is true, empty disjunction is false.
        #[test]
        fn empty_and_is_true_empty_or_is_false(x in any::<i64>()) {
            prop_assert!(and::<i64>(vec![]).satisfied_by(&x));
            prop_assert!(!or::<i64>(vec![]).satisfied_by(&x));
        }

        /// Property: double negation is the identity.
        #[test]
        fn double_negation_is_identity(x in any::<i64>()) {
            prop_assert_eq!(not(not(even())).satisfied_by(&x), even().satisfied_by(&x));
            prop_assert_eq!(not(not(positive())).satisfied_by(&x), positive().satisfied_by(&x));
        }

        /// Property: De Morgan holds for the combinators.
        #[test]
        fn de_morgan(x in any::<i64>()) {
            let lhs = not(and(vec![even(), positive()]));
            let rhs = or::<i64>(vec![not(even()).boxed(), not(positive()).boxed()]);
            prop_assert_eq!(lhs.satisfied_by(&x), rhs.satisfied_by(&x));
        }

        /// Property: evaluation is deterministic.
        #[test]
        fn evaluation_is_pure(x in any::<i64>()) {
            let spec = or::<i64>(vec![even(), not(positive()).boxed()]);
            prop_assert_eq!(spec.satisfied_by(&x), spec.satisfied_by(&x));
        }
    }
}

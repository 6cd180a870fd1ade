//! Values that may or may not be reactive

use crate::calc::Calc;
use crate::error::ReactiveError;
use crate::field::Field;
use crate::subscription::Subscription;

/// A value that is either constant or backed by a [`Field`] / [`Calc`].
///
/// APIs that accept "a name" or "some code" take a `Dyn` so callers can pass
/// a literal, a field they mutate later, or something derived.
#[derive(Debug)]
pub enum Dyn<T: 'static> {
    /// A constant
    Value(T),
    /// A mutable field
    Field(Field<T>),
    /// A derived calc
    Calc(Calc<T>),
}

impl<T: Clone + 'static> Clone for Dyn<T> {
    fn clone(&self) -> Self {
        match self {
            Dyn::Value(v) => Dyn::Value(v.clone()),
            Dyn::Field(f) => Dyn::Field(f.clone()),
            Dyn::Calc(c) => Dyn::Calc(c.clone()),
        }
    }
}

impl<T: Clone + 'static> Dyn<T> {
    /// Read the current value, recording a dependency when reactive
    pub fn get(&self) -> Result<T, ReactiveError> {
        match self {
            Dyn::Value(v) => Ok(v.clone()),
            Dyn::Field(f) => Ok(f.get()),
            Dyn::Calc(c) => c.get(),
        }
    }

    /// Subscribe to changes; constants never notify
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        match self {
            Dyn::Value(_) => Subscription::inert(),
            Dyn::Field(f) => f.subscribe(callback),
            Dyn::Calc(c) => c.subscribe(callback),
        }
    }

    /// Whether the value can change
    pub fn is_reactive(&self) -> bool {
        !matches!(self, Dyn::Value(_))
    }
}

impl<T: 'static> From<Field<T>> for Dyn<T> {
    fn from(field: Field<T>) -> Self {
        Dyn::Field(field)
    }
}

impl<T: 'static> From<Calc<T>> for Dyn<T> {
    fn from(calc: Calc<T>) -> Self {
        Dyn::Calc(calc)
    }
}

impl From<&str> for Dyn<Option<String>> {
    fn from(value: &str) -> Self {
        Dyn::Value(Some(value.to_string()))
    }
}

impl From<String> for Dyn<Option<String>> {
    fn from(value: String) -> Self {
        Dyn::Value(Some(value))
    }
}

impl From<Option<String>> for Dyn<Option<String>> {
    fn from(value: Option<String>) -> Self {
        Dyn::Value(value)
    }
}

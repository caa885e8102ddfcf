//! The key to value store and its tangent-space companion.
//!
//! [`Values`] holds one manifold value per key, type-erased behind the
//! [`Value`] trait so that rotations, points and scalars can share a store.
//! Typed access goes through [`Values::at`], which checks the stored type.
//!
//! [`VectorValues`] holds one tangent vector per key. It is what
//! [`Values::zero_vectors`] produces and what [`Values::retract`] consumes,
//! which together give finite-difference checks their perturbation
//! mechanism.

use crate::error::{Result, ValuesError};
use crate::key::Key;
use crate::manifold::Manifold;
use crate::testable::Testable;
use crate::types::DVector;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};

/// Object-safe view of a [`Manifold`] value stored in [`Values`].
///
/// Implemented for every `T: Manifold`; there is no reason to implement it
/// by hand.
pub trait Value: Any + Debug + Send + Sync {
    /// Tangent dimension of the value.
    fn tangent_dim(&self) -> usize;

    /// Name of the concrete type, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Retracts the value by `delta`.
    fn retract_boxed(&self, delta: &DVector<f64>) -> Box<dyn Value>;

    /// Clones the value into a new box.
    fn clone_boxed(&self) -> Box<dyn Value>;

    /// Tolerance comparison; values of different types are never equal.
    fn equals_value(&self, other: &dyn Value, tol: f64) -> bool;

    /// Labeled representation, see [`Testable::write_labeled`].
    fn write_value(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Upcast used for typed access.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Manifold> Value for T {
    fn tangent_dim(&self) -> usize {
        T::DIM
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn retract_boxed(&self, delta: &DVector<f64>) -> Box<dyn Value> {
        Box::new(self.retract(delta))
    }

    fn clone_boxed(&self) -> Box<dyn Value> {
        Box::new(self.clone())
    }

    fn equals_value(&self, other: &dyn Value, tol: f64) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self.equals(other, tol))
    }

    fn write_value(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        self.write_labeled(label, out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Store mapping keys to their current manifold values.
#[derive(Debug, Default)]
pub struct Values {
    values: BTreeMap<Key, Box<dyn Value>>,
}

impl Values {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under a new key.
    ///
    /// # Errors
    ///
    /// Returns [`ValuesError::KeyExists`] if the key is already present.
    pub fn insert<T: Manifold>(&mut self, key: Key, value: T) -> Result<()> {
        if self.values.contains_key(&key) {
            return Err(ValuesError::key_exists(key));
        }
        self.values.insert(key, Box::new(value));
        Ok(())
    }

    /// Replaces the value of an existing key.
    ///
    /// The replacement must have the same type as the stored value.
    pub fn update<T: Manifold>(&mut self, key: Key, value: T) -> Result<()> {
        self.at::<T>(key)?;
        self.values.insert(key, Box::new(value));
        Ok(())
    }

    /// Returns `true` if a value is stored under `key`.
    pub fn exists(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    /// Typed access to the value stored under `key`.
    ///
    /// # Errors
    ///
    /// [`ValuesError::MissingKey`] if absent, [`ValuesError::TypeMismatch`]
    /// if the stored value is not a `T`.
    pub fn at<T: Manifold>(&self, key: Key) -> Result<&T> {
        let value = self.get_dyn(key)?;
        value.as_any().downcast_ref::<T>().ok_or_else(|| {
            ValuesError::type_mismatch(key, std::any::type_name::<T>(), value.type_name())
        })
    }

    fn get_dyn(&self, key: Key) -> Result<&dyn Value> {
        self.values
            .get(&key)
            .map(|value| &**value)
            .ok_or_else(|| ValuesError::missing_key(key))
    }

    /// Tangent dimension of the value stored under `key`.
    pub fn dim(&self, key: Key) -> Result<usize> {
        Ok(self.get_dyn(key)?.tangent_dim())
    }

    /// Iterates over the stored keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.values.keys().copied()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A zero tangent vector for every stored key.
    pub fn zero_vectors(&self) -> VectorValues {
        let mut zeros = VectorValues::new();
        for (&key, value) in &self.values {
            zeros.insert(key, DVector::zeros(value.tangent_dim()));
        }
        zeros
    }

    /// A zero tangent vector of the right width for `key`.
    pub fn zero_perturbation(&self, key: Key) -> Result<DVector<f64>> {
        Ok(DVector::zeros(self.dim(key)?))
    }

    /// Returns a copy of the store with the value at `key` retracted by `delta`.
    pub fn with_perturbation(&self, key: Key, delta: &DVector<f64>) -> Result<Values> {
        let perturbed = self.retracted(key, delta)?;
        let mut result = self.clone();
        result.values.insert(key, perturbed);
        Ok(result)
    }

    /// Returns a copy of the store with every key present in `delta` retracted.
    ///
    /// Keys of the store that do not appear in `delta` are copied unchanged.
    pub fn retract(&self, delta: &VectorValues) -> Result<Values> {
        let mut result = self.clone();
        for (key, d) in delta.iter() {
            let perturbed = self.retracted(key, d)?;
            result.values.insert(key, perturbed);
        }
        Ok(result)
    }

    fn retracted(&self, key: Key, delta: &DVector<f64>) -> Result<Box<dyn Value>> {
        let value = self.get_dyn(key)?;
        if delta.len() != value.tangent_dim() {
            return Err(ValuesError::dimension_mismatch(key, value.tangent_dim(), delta.len()));
        }
        Ok(value.retract_boxed(delta))
    }
}

impl Clone for Values {
    fn clone(&self) -> Self {
        Self {
            values: self
                .values
                .iter()
                .map(|(&key, value)| (key, value.clone_boxed()))
                .collect(),
        }
    }
}

impl Testable for Values {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{label}: Values with {} values:", self.values.len())?;
        for (&key, value) in &self.values {
            value.write_value(&format!("  Value {key}"), out)?;
        }
        Ok(())
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().all(|(key, value)| {
                other
                    .values
                    .get(key)
                    .is_some_and(|theirs| value.equals_value(&**theirs, tol))
            })
    }
}

/// Ordered map of tangent vectors, one per key.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VectorValues {
    values: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the vector for `key`, returning the previous one.
    pub fn insert(&mut self, key: Key, vector: DVector<f64>) -> Option<DVector<f64>> {
        self.values.insert(key, vector)
    }

    /// The vector stored for `key`.
    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    /// Mutable access to the vector stored for `key`.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut DVector<f64>> {
        self.values.get_mut(&key)
    }

    /// Length of the vector stored for `key`.
    pub fn dim(&self, key: Key) -> Option<usize> {
        self.values.get(&key).map(|v| v.len())
    }

    /// Sum of all vector lengths.
    pub fn total_dim(&self) -> usize {
        self.values.values().map(|v| v.len()).sum()
    }

    /// Iterates over `(key, vector)` pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVector<f64>)> {
        self.values.iter().map(|(&key, v)| (key, v))
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Testable for VectorValues {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{label}: VectorValues of size {}", self.values.len())?;
        for (key, v) in &self.values {
            v.write_labeled(&format!("  {key}"), out)?;
        }
        Ok(())
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .all(|(key, v)| other.values.get(key).is_some_and(|w| v.equals(w, tol)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> Values {
        let mut values = Values::new();
        values.insert(1, 0.5_f64).unwrap();
        values.insert(2, -1.0_f64).unwrap();
        values
    }

    #[test]
    fn test_insert_and_at() {
        let values = store();
        assert_eq!(*values.at::<f64>(1).unwrap(), 0.5);
        assert_eq!(values.len(), 2);
        assert_eq!(values.keys().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let mut values = store();
        assert_eq!(values.insert(1, 3.0_f64), Err(ValuesError::key_exists(1)));
    }

    #[test]
    fn test_missing_key() {
        let values = store();
        assert_eq!(values.at::<f64>(9), Err(ValuesError::missing_key(9)));
        assert!(values.dim(9).is_err());
    }

    #[test]
    fn test_zero_vectors_have_value_dims() {
        let zeros = store().zero_vectors();
        assert_eq!(zeros.len(), 2);
        assert_eq!(zeros.dim(1), Some(1));
        assert_eq!(zeros.total_dim(), 2);
    }

    #[test]
    fn test_with_perturbation_leaves_original() {
        let values = store();
        let perturbed = values
            .with_perturbation(1, &DVector::from_element(1, 0.25))
            .unwrap();
        assert_eq!(*values.at::<f64>(1).unwrap(), 0.5);
        assert_eq!(*perturbed.at::<f64>(1).unwrap(), 0.75);
        assert_eq!(*perturbed.at::<f64>(2).unwrap(), -1.0);
    }

    #[test]
    fn test_retract_checks_dimension() {
        let values = store();
        let mut delta = VectorValues::new();
        delta.insert(2, DVector::zeros(3));
        assert_eq!(
            values.retract(&delta).unwrap_err(),
            ValuesError::dimension_mismatch(2, 1, 3)
        );
    }

    #[test]
    fn test_retract_zero_is_identity() {
        let values = store();
        let same = values.retract(&values.zero_vectors()).unwrap();
        assert!(same.equals(&values, 1e-12));
    }

    #[test]
    fn test_update_keeps_type() {
        let mut values = store();
        values.update(2, 4.0_f64).unwrap();
        assert_eq!(*values.at::<f64>(2).unwrap(), 4.0);
        assert!(values.update(7, 1.0_f64).is_err());
    }

    #[test]
    fn test_values_print_lists_entries() {
        let mut out = String::new();
        store().write_labeled("theta", &mut out).unwrap();
        assert!(out.starts_with("theta: Values with 2 values"));
        assert!(out.contains("Value 2: -1"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_vector_values_serde() {
        let mut delta = VectorValues::new();
        delta.insert(3, DVector::from_vec(vec![0.5, -1.0]));
        let json = serde_json::to_string(&delta).unwrap();
        let back: VectorValues = serde_json::from_str(&json).unwrap();
        assert_eq!(back, delta);
    }
}

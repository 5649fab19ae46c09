use orbtrack_common::ObserverLocation;

use crate::error::{TrackerError, TrackerResult};

/// Reject an observer the transformer or alert evaluator cannot use.
pub fn validate_observer(observer: &ObserverLocation) -> TrackerResult<()> {
    if observer.name.trim().is_empty() {
        return Err(TrackerError::config("observer name must not be empty"));
    }

    let name = &observer.name;
    if !observer.latitude_deg.is_finite() || !(-90.0..=90.0).contains(&observer.latitude_deg) {
        return Err(TrackerError::config(format!(
            "observer '{}' latitude {} outside [-90, 90]",
            name, observer.latitude_deg
        )));
    }
    if !observer.longitude_deg.is_finite() || !(-180.0..=180.0).contains(&observer.longitude_deg) {
        return Err(TrackerError::config(format!(
            "observer '{}' longitude {} outside [-180, 180]",
            name, observer.longitude_deg
        )));
    }
    if !observer.altitude_m.is_finite() {
        return Err(TrackerError::config(format!("observer '{}' altitude is not finite", name)));
    }

    let thresholds = &observer.thresholds;
    if !thresholds.distance_km.is_finite() || thresholds.distance_km <= 0.0 {
        return Err(TrackerError::config(format!(
            "observer '{}' distance threshold must be positive",
            name
        )));
    }
    if !thresholds.elevation_deg.is_finite() || !(-90.0..=90.0).contains(&thresholds.elevation_deg) {
        return Err(TrackerError::config(format!(
            "observer '{}' elevation threshold outside [-90, 90]",
            name
        )));
    }
    Ok(())
}

/// The operator's ground stations, unique by name
#[derive(Debug, Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<ObserverLocation>,
}

impl ObserverRegistry {
    pub fn new(observers: Vec<ObserverLocation>) -> TrackerResult<Self> {
        let mut registry = Self::default();
        for observer in observers {
            registry.add(observer)?;
        }
        Ok(registry)
    }

    pub fn list(&self) -> &[ObserverLocation] {
        &self.observers
    }

    pub fn get(&self, name: &str) -> Option<&ObserverLocation> {
        self.observers.iter().find(|o| o.name == name)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn add(&mut self, observer: ObserverLocation) -> TrackerResult<()> {
        validate_observer(&observer)?;
        if self.get(&observer.name).is_some() {
            return Err(TrackerError::config(format!(
                "observer '{}' already exists",
                observer.name
            )));
        }
        self.observers.push(observer);
        Ok(())
    }

    /// Replace the observer called `name`. Renaming onto another observer's name is rejected.
    pub fn edit(&mut self, name: &str, observer: ObserverLocation) -> TrackerResult<()> {
        validate_observer(&observer)?;
        let index = self.index_of(name)?;
        if observer.name != name && self.get(&observer.name).is_some() {
            return Err(TrackerError::config(format!(
                "observer '{}' already exists",
                observer.name
            )));
        }
        self.observers[index] = observer;
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> TrackerResult<ObserverLocation> {
        let index = self.index_of(name)?;
        Ok(self.observers.remove(index))
    }

    fn index_of(&self, name: &str) -> TrackerResult<usize> {
        self.observers
            .iter()
            .position(|o| o.name == name)
            .ok_or_else(|| TrackerError::config(format!("no observer named '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_observer() {
        assert!(validate_observer(&ObserverLocation::new("Delhi", 28.6139, 77.2090, 216.0)).is_ok());
        assert!(validate_observer(&ObserverLocation::new("", 0.0, 0.0, 0.0)).is_err());
        assert!(validate_observer(&ObserverLocation::new("North", 91.0, 0.0, 0.0)).is_err());
        assert!(validate_observer(&ObserverLocation::new("East", 0.0, 180.5, 0.0)).is_err());
        assert!(validate_observer(&ObserverLocation::new("Void", f64::NAN, 0.0, 0.0)).is_err());

        let mut observer = ObserverLocation::new("Station", 0.0, 0.0, 0.0);
        observer.thresholds.distance_km = 0.0;
        assert!(validate_observer(&observer).unwrap_err().is_fatal());
    }

    #[test]
    fn test_registry_add_edit_delete() {
        let mut registry = ObserverRegistry::new(vec![
            ObserverLocation::new("New Delhi", 28.6139, 77.2090, 216.0),
            ObserverLocation::new("New York", 40.7128, -74.0060, 10.0),
        ])
        .unwrap();

        assert!(registry.add(ObserverLocation::new("New York", 0.0, 0.0, 0.0)).is_err());

        let mut moved = ObserverLocation::new("Brooklyn", 40.6782, -73.9442, 5.0);
        moved.thresholds.elevation_deg = 30.0;
        registry.edit("New York", moved).unwrap();
        assert!(registry.get("New York").is_none());
        assert_eq!(registry.get("Brooklyn").unwrap().thresholds.elevation_deg, 30.0);

        assert!(registry
            .edit("Brooklyn", ObserverLocation::new("New Delhi", 0.0, 0.0, 0.0))
            .is_err());
        assert!(registry
            .edit("Brooklyn", ObserverLocation::new("Brooklyn", 95.0, 0.0, 0.0))
            .is_err());

        let removed = registry.delete("New Delhi").unwrap();
        assert_eq!(removed.name, "New Delhi");
        assert_eq!(registry.len(), 1);
        assert!(registry.delete("New Delhi").is_err());
    }
}

//! Unit of work: scoped, isolated, atomically persisted entity state.
//!
//! ## Lifecycle
//!
//! 1. `UnitOfWorkFactory::new_unit_of_work` opens a unit (`Open`).
//! 2. `new_entity` / `get` / `remove` build up privately owned states.
//! 3. `complete` validates, runs callbacks, and hands the change-set to the
//!    store, which checks versions and applies it all-or-nothing.
//! 4. `discard` drops everything without touching the store.
//!
//! Conflicts are reported, never retried here. Retrying means opening a new
//! unit and redoing the logical operation.

pub mod callback;
pub mod context;
pub mod error;
pub mod factory;
pub mod instance;

pub use callback::{CompletionView, UnitOfWorkCallback};
pub use context::UnitOfWorkContext;
pub use error::UnitOfWorkError;
pub use factory::UnitOfWorkFactory;
pub use instance::{UnitOfWork, UnitOfWorkStatus, Usecase};

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use strata_core::{
        EntityDescriptor, EntityReference, EntityStatus, EntityTypeRegistry, EntityVersion,
        Identity, Module, PropertyDescriptor, UnitOfWorkId, ValidationRule,
    };

    use super::*;
    use crate::config::PersistenceConfig;
    use crate::entity_store::{EntityStore, InMemoryEntityStore};

    fn module() -> Module {
        let registry = EntityTypeRegistry::new()
            .with(EntityDescriptor::new("Vehicle"))
            .unwrap()
            .with(
                EntityDescriptor::new("Car")
                    .extends("Vehicle")
                    .property(
                        "color",
                        PropertyDescriptor::required().with_rule(ValidationRule::NotEmpty),
                    )
                    .property("doors", PropertyDescriptor::optional().with_default(4))
                    .association("owner"),
            )
            .unwrap()
            .with(EntityDescriptor::new("Person").property("name", PropertyDescriptor::optional()))
            .unwrap();
        Module::new("fleet", Arc::new(registry))
    }

    fn factory() -> UnitOfWorkFactory<InMemoryEntityStore> {
        UnitOfWorkFactory::new(InMemoryEntityStore::new(), module())
    }

    fn create_car(factory: &UnitOfWorkFactory<InMemoryEntityStore>, identity: &str) -> EntityReference {
        let mut uow = factory.new_unit_of_work(Usecase::new("create car"));
        let car = uow.new_entity("Car", Some(identity.into())).unwrap();
        car.set_property("color", "red").unwrap();
        let reference = car.reference().clone();
        uow.complete().unwrap();
        reference
    }

    #[test]
    fn new_entity_gets_defaults_and_generated_identity() {
        let factory = factory().with_identity_generator(|_: &strata_core::EntityTypeName| {
            Identity::new("generated")
        });
        let mut uow = factory.new_unit_of_work(Usecase::default());
        let car = uow.new_entity("Car", None).unwrap();

        assert_eq!(car.identity().as_str(), "generated");
        assert_eq!(car.status(), EntityStatus::New);
        assert_eq!(car.property("doors"), Some(&json!(4)));
        assert_eq!(car.last_modified(), uow.current_time());
    }

    #[test]
    fn unregistered_type_is_a_construction_error() {
        let factory = factory();
        let mut uow = factory.new_unit_of_work(Usecase::default());
        let err = uow.new_entity("Spaceship", None).unwrap_err();
        assert!(matches!(err, UnitOfWorkError::Construction { .. }));
    }

    #[test]
    fn duplicate_identity_in_one_unit_is_rejected() {
        let factory = factory();
        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.new_entity("Car", Some("x".into())).unwrap();
        assert!(matches!(
            uow.new_entity("Car", Some("x".into())),
            Err(UnitOfWorkError::Construction { .. })
        ));
    }

    #[test]
    fn get_tracks_loaded_state_once() {
        let factory = factory();
        let reference = create_car(&factory, "Ferrari");

        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.get(&reference).unwrap().set_property("color", "blue").unwrap();
        let again = uow.get(&reference).unwrap();
        assert_eq!(again.status(), EntityStatus::Updated);
        assert_eq!(again.property("color"), Some(&json!("blue")));
    }

    #[test]
    fn get_distinguishes_missing_and_mismatched() {
        let factory = factory();
        let reference = create_car(&factory, "Ferrari");
        let mut uow = factory.new_unit_of_work(Usecase::default());

        assert!(matches!(
            uow.get(&EntityReference::new("Car", "nope")),
            Err(UnitOfWorkError::EntityNotFound(_))
        ));
        assert!(matches!(
            uow.get(&reference.with_type("Person")),
            Err(UnitOfWorkError::EntityTypeMismatch { .. })
        ));
        assert!(uow.get(&reference.with_type("Vehicle")).is_ok());
    }

    #[test]
    fn removing_new_entity_detaches_it() {
        let factory = factory();
        let mut uow = factory.new_unit_of_work(Usecase::default());
        let reference = uow
            .new_entity("Car", Some("temp".into()))
            .unwrap()
            .reference()
            .clone();
        uow.remove(&reference).unwrap();

        assert_eq!(uow.tracked_states().count(), 0);
        assert!(uow.complete().unwrap().is_empty());
        assert_eq!(factory.store().version_of(&"temp".into()).unwrap(), None);
    }

    #[test]
    fn removing_new_entity_through_its_state_writes_nothing() {
        let factory = factory();
        let mut uow = factory.new_unit_of_work(Usecase::default());
        let car = uow.new_entity("Car", Some("c-new".into())).unwrap();
        car.set_property("color", "red").unwrap();
        car.remove();

        assert!(uow.complete().unwrap().is_empty());
        assert_eq!(factory.store().version_of(&"c-new".into()).unwrap(), None);
        assert!(factory.store().is_empty().unwrap());
    }

    #[test]
    fn removed_entity_is_deleted_on_complete() {
        let factory = factory();
        let reference = create_car(&factory, "Ferrari");

        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.remove(&reference).unwrap();
        assert!(matches!(
            uow.get(&reference),
            Err(UnitOfWorkError::EntityNotFound(_))
        ));
        uow.complete().unwrap();

        assert_eq!(factory.store().version_of(reference.identity()).unwrap(), None);
    }

    #[test]
    fn validation_failure_keeps_unit_open() {
        let factory = factory();
        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.new_entity("Car", Some("blank".into())).unwrap();

        let err = uow.complete().unwrap_err();
        assert!(matches!(err, UnitOfWorkError::ConstraintViolation(_)));
        assert_eq!(uow.status(), UnitOfWorkStatus::Open);

        uow.get(&EntityReference::new("Car", "blank"))
            .unwrap()
            .set_property("color", "green")
            .unwrap();
        let committed = uow.complete().unwrap();
        assert_eq!(committed[0].version, EntityVersion::new(1));
    }

    #[test]
    fn terminal_units_reject_everything_but_failed_discard() {
        let factory = factory();
        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.complete().unwrap();

        assert!(matches!(uow.complete(), Err(UnitOfWorkError::Closed { .. })));
        assert!(matches!(uow.discard(), Err(UnitOfWorkError::Closed { .. })));
        assert!(matches!(
            uow.new_entity("Car", None),
            Err(UnitOfWorkError::Closed { .. })
        ));

        let mut other = factory.new_unit_of_work(Usecase::default());
        other.discard().unwrap();
        assert!(matches!(other.discard(), Err(UnitOfWorkError::Closed { .. })));
        assert!(matches!(
            other.get(&EntityReference::new("Car", "x")),
            Err(UnitOfWorkError::Closed { .. })
        ));
    }

    #[derive(Default)]
    struct Recorder {
        veto: Option<String>,
        seen_changes: Mutex<Vec<usize>>,
        finished: Mutex<Vec<(UnitOfWorkId, UnitOfWorkStatus)>>,
    }

    impl UnitOfWorkCallback for Recorder {
        fn before_completion(&self, view: &CompletionView<'_>) -> Result<(), String> {
            self.seen_changes.lock().unwrap().push(view.changes.len());
            match &self.veto {
                Some(reason) => Err(reason.clone()),
                None => Ok(()),
            }
        }

        fn after_completion(&self, id: UnitOfWorkId, status: UnitOfWorkStatus) {
            self.finished.lock().unwrap().push((id, status));
        }
    }

    #[test]
    fn callbacks_observe_completion_and_discard() {
        let factory = factory();
        let recorder = Arc::new(Recorder::default());

        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.add_callback(recorder.clone());
        uow.new_entity("Car", None).unwrap().set_property("color", "red").unwrap();
        let id = uow.id();
        uow.complete().unwrap();

        let mut other = factory.new_unit_of_work(Usecase::default());
        other.add_callback(recorder.clone());
        let other_id = other.id();
        other.discard().unwrap();

        assert_eq!(*recorder.seen_changes.lock().unwrap(), vec![1]);
        assert_eq!(
            *recorder.finished.lock().unwrap(),
            vec![
                (id, UnitOfWorkStatus::Completed),
                (other_id, UnitOfWorkStatus::Discarded)
            ]
        );
    }

    #[test]
    fn veto_keeps_unit_open() {
        let factory = factory();
        let recorder = Arc::new(Recorder {
            veto: Some("not today".to_string()),
            ..Recorder::default()
        });

        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.add_callback(recorder.clone());
        uow.new_entity("Car", None).unwrap().set_property("color", "red").unwrap();

        assert!(matches!(uow.complete(), Err(UnitOfWorkError::Vetoed(reason)) if reason == "not today"));
        assert!(uow.is_open());
        assert!(recorder.finished.lock().unwrap().is_empty());
        assert!(factory.store().is_empty().unwrap());
    }

    #[test]
    fn removed_callback_no_longer_vetoes() {
        let factory = factory();
        let recorder = Arc::new(Recorder {
            veto: Some("not today".to_string()),
            ..Recorder::default()
        });
        let handle: Arc<dyn UnitOfWorkCallback> = recorder.clone();

        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.add_callback(handle.clone());
        uow.new_entity("Car", None).unwrap().set_property("color", "red").unwrap();
        assert!(matches!(uow.complete(), Err(UnitOfWorkError::Vetoed(_))));

        assert!(uow.remove_callback(&handle));
        assert!(!uow.remove_callback(&handle));
        assert_eq!(uow.complete().unwrap().len(), 1);
        assert_eq!(*recorder.seen_changes.lock().unwrap(), vec![1]);
        assert!(recorder.finished.lock().unwrap().is_empty());
    }

    #[test]
    fn pause_and_resume() {
        let factory = factory().with_config(PersistenceConfig {
            prune_on_pause: true,
            ..PersistenceConfig::default()
        });
        let loaded = create_car(&factory, "a");
        let modified = create_car(&factory, "b");

        let mut uow = factory.new_unit_of_work(Usecase::default());
        uow.get(&loaded).unwrap();
        uow.get(&modified).unwrap().set_property("color", "blue").unwrap();

        uow.pause().unwrap();
        assert!(matches!(uow.pause(), Err(UnitOfWorkError::InvalidState(_))));
        assert!(matches!(uow.get(&loaded), Err(UnitOfWorkError::InvalidState(_))));
        assert_eq!(uow.tracked_states().count(), 1);

        uow.resume().unwrap();
        assert!(matches!(uow.resume(), Err(UnitOfWorkError::InvalidState(_))));
        assert_eq!(uow.get(&loaded).unwrap().status(), EntityStatus::Loaded);
        uow.complete().unwrap();
    }

    #[test]
    fn context_stack_pauses_outer_unit() {
        let factory = factory();
        let mut context = UnitOfWorkContext::new();
        context.push(factory.new_unit_of_work(Usecase::new("outer")));

        let outer = context.pause_current().unwrap().unwrap();
        assert!(outer.is_paused());
        assert!(context.is_empty());

        context.push(factory.new_unit_of_work(Usecase::new("inner")));
        let mut inner = context.pop().unwrap();
        inner.new_entity("Car", None).unwrap().set_property("color", "red").unwrap();
        inner.complete().unwrap();

        context.resume(outer).unwrap();
        let current = context.current().unwrap();
        assert_eq!(current.usecase().name(), "outer");
        assert!(!current.is_paused());
        assert_eq!(context.len(), 1);
    }
}

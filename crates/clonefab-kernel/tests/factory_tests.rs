//! Factory facade behaviour

use clonefab_kernel::{
    ErrorClass, FactoryError, FactoryEvent, InstanceFactory, LedgerReader, TemplateCode,
};
use clonefab_test_utils::{
    alice, bob, cloned_token_params, factory, factory_with_store, unconfigured_factory,
    FailingStore,
};
use clonefab_types::{Identity, ParamField, ParamSet, ValidationError};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast::error::TryRecvError;

#[test]
fn create_records_entry_and_announces_it() {
    let factory = factory();
    let mut events = factory.subscribe();

    let instance = factory.create(alice(), cloned_token_params()).unwrap();

    let entry = factory.lookup_by_instance(&instance).unwrap();
    assert_eq!(entry.sequence, 0);
    assert_eq!(entry.instance, instance);
    assert_eq!(entry.creator, alice());
    assert_eq!(entry.params, cloned_token_params());

    let event = events.try_recv().unwrap();
    assert_eq!(
        event,
        FactoryEvent::InstanceCreated {
            instance,
            owner: alice(),
            params: cloned_token_params(),
            sequence: 0,
        }
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn created_instance_behaves_like_initialized_clone() {
    let factory = factory();
    let instance = factory.create(alice(), cloned_token_params()).unwrap();

    let handle = factory.instance(&instance).unwrap();
    assert!(handle.is_initialized());
    assert_eq!(handle.name().unwrap(), "ClonedToken");
    assert_eq!(handle.symbol().unwrap(), "CTKN");
    assert_eq!(handle.owner().unwrap(), alice());
    assert_eq!(handle.template(), factory.template().unwrap());
    assert_ne!(instance, factory.template().unwrap());
}

#[test]
fn repeated_create_gives_distinct_instances_in_order() {
    let factory = factory();
    let first = factory.create(alice(), cloned_token_params()).unwrap();
    let second = factory.create(alice(), cloned_token_params()).unwrap();
    assert_ne!(first, second);

    let listed = factory.list_by_creator(&alice());
    assert_eq!(listed.len(), 2);
    assert_eq!((listed[0].instance, listed[0].sequence), (first, 0));
    assert_eq!((listed[1].instance, listed[1].sequence), (second, 1));
}

#[test]
fn entry_at_walks_creations() {
    let factory = factory();
    let ids: Vec<Identity> = [alice(), bob(), alice()]
        .into_iter()
        .map(|owner| factory.create(owner, cloned_token_params()).unwrap())
        .collect();

    for (seq, id) in ids.iter().enumerate() {
        assert_eq!(factory.entry_at(seq as u64).unwrap().instance, *id);
    }
    assert!(factory.entry_at(3).is_none());
    assert_eq!(factory.list_by_creator(&bob()).len(), 1);
}

#[test]
fn invalid_create_leaves_no_trace() {
    let factory = factory();
    factory.create(alice(), cloned_token_params()).unwrap();
    let mut events = factory.subscribe();
    let before = (factory.ledger_len(), factory.instance_count(), factory.predict_next());

    let err = factory
        .create(alice(), ParamSet::new("ClonedToken", ""))
        .unwrap_err();

    assert!(matches!(
        err,
        FactoryError::InvalidParameters(ValidationError::Empty {
            field: ParamField::Symbol
        })
    ));
    assert_eq!(err.class(), ErrorClass::Validation);
    assert_eq!(
        (factory.ledger_len(), factory.instance_count(), factory.predict_next()),
        before
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn zero_owner_is_rejected() {
    let factory = factory();
    let err = factory
        .create(Identity::ZERO, cloned_token_params())
        .unwrap_err();
    assert!(matches!(err, FactoryError::InvalidParameters(ValidationError::ZeroOwner)));
    assert_eq!(factory.ledger_len(), 0);
}

#[test]
fn retry_after_failure_gets_fresh_identity() {
    let factory = factory();
    let predicted = factory.predict_next();
    assert!(factory.create(alice(), ParamSet::new("", "")).is_err());
    let id = factory.create(alice(), cloned_token_params()).unwrap();
    assert_eq!(id, predicted);

    let again = factory.create(alice(), cloned_token_params()).unwrap();
    assert_ne!(again, id);
}

#[test]
fn unconfigured_factory_rejects_create() {
    let factory = unconfigured_factory();
    let err = factory.create(alice(), cloned_token_params()).unwrap_err();
    assert!(matches!(err, FactoryError::Unconfigured));
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(matches!(factory.template(), Err(FactoryError::Unconfigured)));
}

#[test]
fn template_cannot_be_reconfigured() {
    let factory = factory();
    let err = factory
        .configure_template(TemplateCode::new("Other", 2))
        .unwrap_err();
    assert!(matches!(err, FactoryError::AlreadyConfigured(_)));
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[test]
fn initialize_unknown_instance_is_rejected() {
    let factory = factory();
    let stranger = Identity::named("not-an-instance");

    let err = factory
        .initialize(stranger, alice(), cloned_token_params())
        .unwrap_err();

    assert!(matches!(err, FactoryError::UnknownInstance(id) if id == stranger));
    assert_eq!(err.class(), ErrorClass::Resolution);
    assert!(factory.lookup_by_instance(&stranger).is_none());
    assert_eq!(factory.ledger_len(), 0);
}

#[test]
fn two_step_path_initializes_once() {
    let factory = factory();
    let mut events = factory.subscribe();
    let instance = factory.deploy_uninitialized().unwrap();

    let handle = factory.instance(&instance).unwrap();
    assert!(!handle.is_initialized());
    assert!(matches!(handle.name(), Err(FactoryError::NotInitialized(_))));
    assert!(factory.lookup_by_instance(&instance).is_none());

    let entry = factory
        .initialize(instance, bob(), cloned_token_params())
        .unwrap();
    assert_eq!(entry.sequence, 0);
    assert_eq!(entry.creator, bob());
    assert_eq!(handle.owner().unwrap(), bob());
    assert_eq!(events.try_recv().unwrap().sequence(), 0);

    let err = factory
        .initialize(instance, alice(), ParamSet::new("Hijack", "HJK"))
        .unwrap_err();
    assert!(matches!(err, FactoryError::AlreadyInitialized(id) if id == instance));
    assert_eq!(err.class(), ErrorClass::LatchContention);
    assert_eq!(handle.owner().unwrap(), bob());
    assert_eq!(factory.ledger_len(), 1);
}

#[test]
fn two_step_invalid_params_keep_instance_open() {
    let factory = factory();
    let instance = factory.deploy_uninitialized().unwrap();

    assert!(factory
        .initialize(instance, alice(), ParamSet::new("Bad Symbol", "B S"))
        .is_err());
    assert!(!factory.instance(&instance).unwrap().is_initialized());

    factory
        .initialize(instance, alice(), cloned_token_params())
        .unwrap();
    assert!(factory.instance(&instance).unwrap().is_initialized());
}

#[test]
fn abandoned_instance_has_no_entry() {
    let factory = factory();
    let abandoned = factory.deploy_uninitialized().unwrap();
    let created = factory.create(alice(), cloned_token_params()).unwrap();

    assert!(factory.lookup_by_instance(&abandoned).is_none());
    assert_eq!(factory.lookup_by_instance(&created).unwrap().sequence, 0);
    assert_eq!(factory.instance_count(), 2);
}

#[test]
fn store_failure_is_internal_and_leaves_no_trace() {
    let store = FailingStore::new();
    let switch = store.switch();
    let factory = factory_with_store(Box::new(store));
    factory.create(alice(), cloned_token_params()).unwrap();

    switch.store(true, Ordering::SeqCst);
    let predicted = factory.predict_next();
    let err = factory.create(bob(), cloned_token_params()).unwrap_err();

    assert!(matches!(err, FactoryError::Internal(_)));
    assert!(err.is_fatal());
    assert_eq!(err.class(), ErrorClass::Internal);
    assert_eq!(factory.ledger_len(), 1);
    assert_eq!(factory.instance_count(), 1);
    assert_eq!(factory.predict_next(), predicted);

    switch.store(false, Ordering::SeqCst);
    assert_eq!(factory.create(bob(), cloned_token_params()).unwrap(), predicted);
}

#[test]
fn store_failure_on_initialize_keeps_latch_open() {
    let store = FailingStore::new();
    let switch = store.switch();
    let factory = factory_with_store(Box::new(store));
    let instance = factory.deploy_uninitialized().unwrap();

    switch.store(true, Ordering::SeqCst);
    let err = factory
        .initialize(instance, alice(), cloned_token_params())
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(!factory.instance(&instance).unwrap().is_initialized());

    switch.store(false, Ordering::SeqCst);
    factory
        .initialize(instance, alice(), cloned_token_params())
        .unwrap();
}

#[test]
fn store_failure_on_deploy_hands_out_nothing() {
    let store = FailingStore::new();
    let switch = store.switch();
    let factory = factory_with_store(Box::new(store));
    let predicted = factory.predict_next();

    switch.store(true, Ordering::SeqCst);
    let err = factory.deploy_uninitialized().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(factory.instance_count(), 0);
    assert_eq!(factory.predict_next(), predicted);
    assert!(matches!(
        factory.instance(&predicted),
        Err(FactoryError::UnknownInstance(_))
    ));

    switch.store(false, Ordering::SeqCst);
    assert_eq!(factory.deploy_uninitialized().unwrap(), predicted);
}

#[test]
fn event_json_shape() {
    let factory = factory();
    let mut events = factory.subscribe();
    let instance = factory.create(alice(), cloned_token_params()).unwrap();

    let json = serde_json::to_value(events.try_recv().unwrap()).unwrap();
    assert_eq!(json["event"], "InstanceCreated");
    assert_eq!(json["instance"], instance.to_string());
    assert_eq!(json["owner"], alice().to_string());
    assert_eq!(json["params"]["symbol"], "CTKN");
    assert_eq!(json["sequence"], 0);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn request() -> impl Strategy<Value = ParamSet> {
        prop_oneof![
            3 => ("[A-Z][a-z]{0,10}", "[A-Z0-9]{1,11}").prop_map(|(n, s)| ParamSet::new(n, s)),
            1 => ("[ a-z]{0,3}", "[A-Z-]{0,14}").prop_map(|(n, s)| ParamSet::new(n, s)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn ledger_tracks_exactly_the_successful_creates(requests in prop::collection::vec(request(), 1..20)) {
            let factory = factory();
            let mut created = Vec::new();

            for params in requests {
                let predicted = factory.predict_next();
                let before = factory.ledger_len();
                match factory.create(alice(), params.clone()) {
                    Ok(id) => {
                        prop_assert_eq!(id, predicted);
                        prop_assert_eq!(factory.ledger_len(), before + 1);
                        created.push((id, params));
                    }
                    Err(err) => {
                        prop_assert_eq!(err.class(), ErrorClass::Validation);
                        prop_assert_eq!(factory.ledger_len(), before);
                        prop_assert_eq!(factory.predict_next(), predicted);
                    }
                }
            }

            for (seq, (id, params)) in created.iter().enumerate() {
                let entry = factory.entry_at(seq as u64).unwrap();
                prop_assert_eq!(entry.instance, *id);
                prop_assert_eq!(&entry.params, params);
            }
            prop_assert_eq!(factory.instance_count(), created.len());
        }
    }
}

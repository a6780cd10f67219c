//! Resolution behaviour observed through the facade, on every store backend.

mod support;

use identirust::{ContactId, LinkPrecedence};
use support::backends;

#[test]
fn new_identity_creates_one_primary() {
    for backend in backends() {
        let view = backend.identify(Some("a@x.com"), None);
        assert_eq!(view.primary_contact_id, ContactId(1), "[{}]", backend.name);
        assert_eq!(view.emails, vec!["a@x.com"]);
        assert!(view.phone_numbers.is_empty());
        assert!(view.secondary_contact_ids.is_empty());
        assert_eq!(backend.contact_count(), 1);
    }
}

#[test]
fn new_pair_extends_cluster_with_secondary() {
    for backend in backends() {
        backend.identify(Some("a@x.com"), Some("111"));
        let view = backend.identify(Some("a@x.com"), Some("222"));

        assert_eq!(view.primary_contact_id, ContactId(1), "[{}]", backend.name);
        assert_eq!(view.emails, vec!["a@x.com"]);
        assert_eq!(view.phone_numbers, vec!["111", "222"]);
        assert_eq!(view.secondary_contact_ids, vec![ContactId(2)]);

        let contacts = backend.service.store().scan().unwrap();
        assert_eq!(contacts[1].link_precedence, LinkPrecedence::Secondary);
        assert_eq!(contacts[1].linked_id, Some(ContactId(1)));
    }
}

#[test]
fn bridging_pair_merges_clusters_under_oldest_primary() {
    for backend in backends() {
        backend.identify(Some("a@x.com"), Some("111"));
        backend.identify(Some("b@y.com"), Some("222"));

        let view = backend.identify(Some("a@x.com"), Some("222"));
        assert_eq!(view.primary_contact_id, ContactId(1), "[{}]", backend.name);
        assert!(view.secondary_contact_ids.contains(&ContactId(2)));
        assert_eq!(view.emails, vec!["a@x.com", "b@y.com"]);
        assert_eq!(view.phone_numbers, vec!["111", "222"]);

        let demoted = backend
            .service
            .store()
            .scan()
            .unwrap()
            .into_iter()
            .find(|c| c.id == ContactId(2))
            .unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(ContactId(1)));
    }
}

#[test]
fn merge_from_either_side_picks_same_primary() {
    for backend in backends() {
        backend.identify(Some("a@x.com"), Some("111"));
        backend.identify(Some("b@y.com"), Some("222"));

        // Phone points at the older cluster, email at the newer one.
        let view = backend.identify(Some("b@y.com"), Some("111"));
        assert_eq!(view.primary_contact_id, ContactId(1), "[{}]", backend.name);
    }
}

#[test]
fn repeated_exact_pair_is_idempotent() {
    for backend in backends() {
        let first = backend.identify(Some("a@x.com"), Some("111"));
        backend.identify(Some("a@x.com"), Some("222"));
        let settled = backend.identify(Some("a@x.com"), Some("222"));
        let count = backend.contact_count();

        for _ in 0..3 {
            assert_eq!(backend.identify(Some("a@x.com"), Some("222")), settled);
            assert_eq!(backend.identify(Some("a@x.com"), Some("111")), settled);
        }
        assert_eq!(backend.contact_count(), count, "[{}]", backend.name);
        assert_eq!(first.primary_contact_id, settled.primary_contact_id);
    }
}

#[test]
fn partial_resubmission_never_creates() {
    for backend in backends() {
        backend.identify(Some("a@x.com"), Some("111"));
        backend.identify(Some("c@z.com"), Some("111"));
        let count = backend.contact_count();

        for _ in 0..4 {
            backend.identify(Some("c@z.com"), None);
            backend.identify(None, Some("111"));
            backend.identify(Some("a@x.com"), None);
        }
        assert_eq!(backend.contact_count(), count, "[{}]", backend.name);
    }
}

#[test]
fn merge_flattens_secondaries_of_demoted_primary() {
    for backend in backends() {
        backend.identify(Some("a@x.com"), Some("111"));
        backend.identify(Some("b@y.com"), Some("222"));
        // Secondary of the cluster that will be demoted.
        backend.identify(Some("c@z.com"), Some("222"));

        let view = backend.identify(Some("a@x.com"), Some("222"));
        assert_eq!(view.primary_contact_id, ContactId(1), "[{}]", backend.name);
        assert_eq!(
            view.secondary_contact_ids,
            vec![ContactId(2), ContactId(3), ContactId(4)]
        );

        let contacts = backend.service.store().scan().unwrap();
        for contact in &contacts {
            if contact.link_precedence == LinkPrecedence::Secondary {
                let target = contacts
                    .iter()
                    .find(|c| Some(c.id) == contact.linked_id)
                    .unwrap();
                assert_eq!(target.link_precedence, LinkPrecedence::Primary);
            }
        }
        assert!(backend.service.audit().unwrap().is_clean());
    }
}

#[test]
fn three_cluster_merge_keeps_one_primary() {
    for backend in backends() {
        backend.identify(Some("a@x.com"), Some("111"));
        backend.identify(Some("b@y.com"), Some("222"));
        backend.identify(Some("c@z.com"), Some("333"));

        backend.identify(Some("b@y.com"), Some("333"));
        let view = backend.identify(Some("a@x.com"), Some("333"));

        assert_eq!(view.primary_contact_id, ContactId(1), "[{}]", backend.name);
        assert_eq!(view.emails, vec!["a@x.com", "b@y.com", "c@z.com"]);
        assert_eq!(view.phone_numbers, vec!["111", "222", "333"]);

        let report = backend.service.audit().unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.primaries, 1);
    }
}

#[test]
fn validation_failure_touches_nothing() {
    for backend in backends() {
        let err = backend
            .service
            .identify(identirust::IdentifyRequest::new(Some(""), None))
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(backend.contact_count(), 0, "[{}]", backend.name);
    }
}

//! Filter matching against a host's unreserved offers.

use std::collections::HashMap;

use drover_proto::{HostFilter, HostFilterResult, Offer, OfferId};
use tracing::debug;

use crate::constraints::{EvaluateResult, Evaluator, LabelValues};
use crate::scalar::{self, Resources, Scope};

/// Evaluates `filter` against a host's unreserved offers.
///
/// Predicates run in a fixed order; the first failure is the result:
/// offer presence, scalar minimums, port count, GPU exclusivity, then
/// the scheduling constraint. GPU hosts are withheld from tasks that do
/// not ask for GPUs.
pub fn match_host_filter(
    hostname: &str,
    offers: &HashMap<OfferId, Offer>,
    filter: &HostFilter,
    evaluator: &dyn Evaluator,
    slack_types: &[String],
) -> HostFilterResult {
    if offers.is_empty() {
        return HostFilterResult::NoOffer;
    }

    let scope = if filter.resource_constraint.revocable {
        Scope::WithRevocable
    } else {
        Scope::NonRevocable
    };
    let available = Resources::from_offers(offers, scope, slack_types);
    let minimum = Resources::from(filter.resource_constraint.minimum);

    if !available.contains(&minimum) {
        return HostFilterResult::InsufficientResources;
    }

    if filter.resource_constraint.num_ports > scalar::port_count(offers) {
        return HostFilterResult::InsufficientResources;
    }

    if available.has_gpu() && minimum.gpu == 0.0 {
        return HostFilterResult::MismatchGpu;
    }

    if let Some(constraint) = &filter.scheduling_constraint {
        let attributes = offers
            .values()
            .next()
            .map(|o| o.attributes.as_slice())
            .unwrap_or_default();
        let labels = LabelValues::from_host(hostname, attributes);
        match evaluator.evaluate(constraint, &labels) {
            Ok(EvaluateResult::Match | EvaluateResult::NotApplicable) => {}
            Ok(EvaluateResult::Mismatch) => return HostFilterResult::MismatchConstraints,
            Err(err) => {
                debug!(%hostname, error = %err, "constraint evaluation failed");
                return HostFilterResult::MismatchConstraints;
            }
        }
    }

    HostFilterResult::Match
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{EvalError, LabelEvaluator};
    use drover_proto::{
        AgentId, LabelCondition, LabelConstraint, PortRange, QuantityControl, Resource,
        ResourceConstraint, ResourceSpec,
    };

    struct StubEvaluator(EvaluateResult);

    impl Evaluator for StubEvaluator {
        fn evaluate(&self, _: &LabelConstraint, _: &LabelValues) -> Result<EvaluateResult, EvalError> {
            Ok(self.0)
        }
    }

    struct FailingEvaluator;

    impl Evaluator for FailingEvaluator {
        fn evaluate(&self, _: &LabelConstraint, _: &LabelValues) -> Result<EvaluateResult, EvalError> {
            Err(EvalError("some error".to_owned()))
        }
    }

    fn offer(resources: Vec<Resource>) -> Offer {
        Offer {
            id: OfferId::from("o1"),
            hostname: "agent".to_owned(),
            agent_id: AgentId::from("agent"),
            resources,
            attributes: vec![],
            unavailability: None,
        }
    }

    fn offer_map(o: Option<Offer>) -> HashMap<OfferId, Offer> {
        o.into_iter().map(|o| (o.id.clone(), o)).collect()
    }

    fn filter(minimum: ResourceSpec, num_ports: u32) -> HostFilter {
        HostFilter {
            quantity: QuantityControl { max_hosts: 1 },
            resource_constraint: ResourceConstraint {
                minimum,
                num_ports,
                revocable: false,
            },
            ..HostFilter::default()
        }
    }

    fn any_constraint() -> LabelConstraint {
        LabelConstraint::Label {
            key: "rack".to_owned(),
            value: "r1".to_owned(),
            condition: LabelCondition::Equal,
            requirement: 1,
        }
    }

    #[test]
    fn filter_result_table() {
        let full = vec![
            Resource::scalar("cpus", 1.0),
            Resource::scalar("mem", 1.0),
            Resource::scalar("disk", 1.0),
            Resource::scalar("gpus", 1.0),
            Resource::ports(vec![PortRange { begin: 1, end: 2 }]),
        ];
        let no_gpu = vec![
            Resource::scalar("cpus", 1.0),
            Resource::scalar("mem", 1.0),
            Resource::scalar("disk", 1.0),
        ];
        let gpu_no_ports = vec![
            Resource::scalar("cpus", 1.0),
            Resource::scalar("mem", 1.0),
            Resource::scalar("disk", 1.0),
            Resource::scalar("gpus", 1.0),
        ];

        let evaluator = LabelEvaluator::new();
        let cases = [
            (
                // Enough resource with GPU.
                offer_map(Some(offer(full))),
                filter(ResourceSpec { cpu: 1.0, mem: 1.0, disk: 1.0, gpu: 1.0 }, 2),
                HostFilterResult::Match,
            ),
            (
                // Not enough memory.
                offer_map(Some(offer(gpu_no_ports.clone()))),
                filter(ResourceSpec { cpu: 1.0, mem: 2.0, disk: 1.0, gpu: 1.0 }, 0),
                HostFilterResult::InsufficientResources,
            ),
            (
                // Not enough ports.
                offer_map(Some(offer(vec![
                    Resource::scalar("cpus", 1.0),
                    Resource::scalar("mem", 1.0),
                    Resource::scalar("disk", 1.0),
                    Resource::ports(vec![PortRange { begin: 1, end: 2 }]),
                ]))),
                filter(ResourceSpec { cpu: 1.0, mem: 1.0, disk: 1.0, gpu: 0.0 }, 3),
                HostFilterResult::InsufficientResources,
            ),
            (
                // Enough resource without GPU.
                offer_map(Some(offer(no_gpu))),
                filter(ResourceSpec { cpu: 1.0, mem: 1.0, disk: 1.0, gpu: 0.0 }, 0),
                HostFilterResult::Match,
            ),
            (
                // GPU machines are exclusive.
                offer_map(Some(offer(gpu_no_ports))),
                filter(ResourceSpec { cpu: 1.0, mem: 1.0, disk: 1.0, gpu: 0.0 }, 0),
                HostFilterResult::MismatchGpu,
            ),
            (
                // Empty offer map.
                offer_map(None),
                filter(ResourceSpec { cpu: 1.0, mem: 1.0, disk: 1.0, gpu: 0.0 }, 0),
                HostFilterResult::NoOffer,
            ),
        ];

        for (offers, filter, expected) in cases {
            assert_eq!(
                match_host_filter("agent", &offers, &filter, &evaluator, &[]),
                expected
            );
        }
    }

    #[test]
    fn constraint_mismatch_and_error() {
        let offers = offer_map(Some(offer(vec![
            Resource::scalar("cpus", 1.0),
            Resource::scalar("mem", 1.0),
        ])));
        let mut f = filter(ResourceSpec { cpu: 1.0, mem: 1.0, disk: 0.0, gpu: 0.0 }, 0);
        f.scheduling_constraint = Some(any_constraint());

        let mismatch = StubEvaluator(EvaluateResult::Mismatch);
        assert_eq!(
            match_host_filter("agent", &offers, &f, &mismatch, &[]),
            HostFilterResult::MismatchConstraints
        );

        assert_eq!(
            match_host_filter("agent", &offers, &f, &FailingEvaluator, &[]),
            HostFilterResult::MismatchConstraints
        );

        let not_applicable = StubEvaluator(EvaluateResult::NotApplicable);
        assert_eq!(
            match_host_filter("agent", &offers, &f, &not_applicable, &[]),
            HostFilterResult::Match
        );
    }

    #[test]
    fn revocable_filter_counts_slack_resources() {
        let slack = vec!["cpus".to_owned()];
        let mut revocable_cpu = Resource::scalar("cpus", 3.0);
        revocable_cpu.revocable = true;
        let offers = offer_map(Some(offer(vec![
            Resource::scalar("cpus", 1.0),
            Resource::scalar("mem", 1.0),
            revocable_cpu,
        ])));

        let mut wants_revocable = filter(ResourceSpec { cpu: 4.0, mem: 1.0, disk: 0.0, gpu: 0.0 }, 0);
        wants_revocable.resource_constraint.revocable = true;

        let evaluator = LabelEvaluator::new();
        assert_eq!(
            match_host_filter("agent", &offers, &wants_revocable, &evaluator, &slack),
            HostFilterResult::Match
        );

        // The same minimum without the revocable flag cannot be met.
        let strict = filter(ResourceSpec { cpu: 4.0, mem: 1.0, disk: 0.0, gpu: 0.0 }, 0);
        assert_eq!(
            match_host_filter("agent", &offers, &strict, &evaluator, &slack),
            HostFilterResult::InsufficientResources
        );
    }
}

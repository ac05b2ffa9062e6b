//! Feature-matrix test case generator

use crate::netpol_builder::*;
use crate::tags::{self, *};
use crate::test_case::{Action, TestCase, TestStep};
use ipnet::IpNet;
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyPeer, NetworkPolicyPort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use netpol_core::builder::POLICY_TYPE_EGRESS;
use netpol_core::{PortValue, Protocol};
use netpol_probe::ProbeConfig;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

pub const DEFAULT_DNS_PORT: u16 = 53;
const EXTRA_NAMESPACE: &str = "netpol-extra";
const EXTRA_POD: &str = "extra";

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorOptions {
    pub allow_dns: bool,
    pub dns_port: u16,
    /// Address inside the generated IPBlock CIDRs, usually a deployed pod's IP
    pub pod_ip: IpAddr,
    pub namespaces: Vec<String>,
    pub pods: Vec<String>,
    pub ports: Vec<u16>,
    pub protocols: Vec<Protocol>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            allow_dns: true,
            dns_port: DEFAULT_DNS_PORT,
            pod_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)),
            namespaces: vec!["x".into(), "y".into(), "z".into()],
            pods: vec!["a".into(), "b".into(), "c".into()],
            ports: vec![80, 81],
            protocols: Protocol::ALL.to_vec(),
        }
    }
}

/// Expands the feature matrix into test cases.
///
/// Policies target namespace `x`, pod `a`; peers use namespace `y` and pod `b`,
/// where x, y, a, b are the first two configured namespaces and pods.
pub struct Generator {
    options: GeneratorOptions,
    x: String,
    y: String,
    a: String,
    b: String,
    port: u16,
    other_port: u16,
}

fn nth_or_first(values: &[String], n: usize, fallback: &str) -> String {
    values
        .get(n)
        .or_else(|| values.first())
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

fn protocol_tag(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => PROTOCOL_TCP,
        Protocol::Udp => PROTOCOL_UDP,
        Protocol::Sctp => PROTOCOL_SCTP,
    }
}

fn named(port: u16, protocol: Protocol) -> String {
    format!("serve-{}-{}", port, protocol.lower())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dir {
    Ingress,
    Egress,
}

impl Dir {
    const BOTH: [Dir; 2] = [Dir::Ingress, Dir::Egress];

    fn tags(self) -> [&'static str; 2] {
        match self {
            Dir::Ingress => [HAS_INGRESS, INGRESS_ONLY],
            Dir::Egress => [HAS_EGRESS, EGRESS_ONLY],
        }
    }

    fn name(self) -> &'static str {
        match self {
            Dir::Ingress => "ingress",
            Dir::Egress => "egress",
        }
    }

    fn policy(self, netpol: Netpol, rules: Option<Vec<Rule>>) -> NetworkPolicy {
        match self {
            Dir::Ingress => netpol.ingress(rules).build(),
            Dir::Egress => netpol.egress(rules).build(),
        }
    }
}

impl Generator {
    pub fn new(options: GeneratorOptions) -> Self {
        let x = nth_or_first(&options.namespaces, 0, "x");
        let y = nth_or_first(&options.namespaces, 1, "y");
        let a = nth_or_first(&options.pods, 0, "a");
        let b = nth_or_first(&options.pods, 1, "b");
        let port = options.ports.first().copied().unwrap_or(80);
        let other_port = options.ports.get(1).copied().unwrap_or(port);
        Self {
            options,
            x,
            y,
            a,
            b,
            port,
            other_port,
        }
    }

    /// Every test case, unfiltered
    pub fn generate_all(&self) -> Vec<TestCase> {
        let mut cases = Vec::new();
        cases.extend(self.no_policy_cases());
        cases.extend(self.policy_shape_cases());
        cases.extend(self.target_cases());
        cases.extend(self.port_cases());
        cases.extend(self.peer_cases());
        cases.extend(self.multi_policy_cases());
        cases.extend(self.action_cases());

        if self.options.allow_dns {
            for case in &mut cases {
                allow_dns(case, self.options.dns_port);
            }
        }
        debug!("Generated {} test cases", cases.len());
        cases
    }

    /// Test cases matching `include` (all when empty) and none of `exclude`
    pub fn generate(&self, include: &[String], exclude: &[String]) -> Vec<TestCase> {
        filter_test_cases(self.generate_all(), include, exclude)
    }

    fn target_netpol(&self, name: &str) -> Netpol {
        Netpol::new(self.x.as_str(), name).target(match_labels(&[("pod", self.a.as_str())]))
    }

    fn pod_b(&self) -> LabelSelector {
        match_labels(&[("pod", self.b.as_str())])
    }

    fn namespace_y(&self) -> LabelSelector {
        match_labels(&[("ns", self.y.as_str())])
    }

    fn single_policy_case(&self, description: String, tags: Vec<&str>, policy: NetworkPolicy) -> TestCase {
        TestCase::new(description, tags, vec![TestStep::create_policies(vec![policy])])
    }

    fn no_policy_cases(&self) -> Vec<TestCase> {
        vec![TestCase::new(
            "no policies: all traffic allowed",
            [NO_POLICY],
            vec![TestStep::new(ProbeConfig::AllAvailable, vec![])],
        )]
    }

    fn policy_shape_cases(&self) -> Vec<TestCase> {
        let two_rules = || {
            vec![
                Rule::ports(vec![numbered_port(self.port, Some(Protocol::Tcp))]),
                Rule::peers(vec![pod_peer(None, Some(self.pod_b()))]),
            ]
        };
        let rule_variants: Vec<(&str, Option<Vec<Rule>>)> = vec![
            (RULES_NIL, None),
            (RULES_EMPTY, Some(vec![])),
            (RULES_ONE, Some(vec![Rule::allow_all()])),
            (RULES_TWO, Some(two_rules())),
        ];

        let mut cases = Vec::new();
        for (rules_tag, rules) in &rule_variants {
            for dir in Dir::BOTH {
                let mut tags = dir.tags().to_vec();
                tags.push(*rules_tag);
                let policy = dir.policy(self.target_netpol("shape"), rules.clone());
                cases.push(self.single_policy_case(
                    format!("{} policy, {}", dir.name(), rules_tag),
                    tags,
                    policy,
                ));
            }

            let policy = self
                .target_netpol("shape")
                .ingress(rules.clone())
                .egress(rules.clone())
                .build();
            cases.push(self.single_policy_case(
                format!("ingress and egress policy, {}", rules_tag),
                vec![INGRESS_AND_EGRESS, HAS_INGRESS, HAS_EGRESS, *rules_tag],
                policy,
            ));
        }

        // The API server stores this as an Ingress policy with no rules
        cases.push(self.single_policy_case(
            "policy with neither ingress nor egress".to_string(),
            vec![NO_DIRECTION],
            self.target_netpol("shape").build(),
        ));
        cases
    }

    fn target_cases(&self) -> Vec<TestCase> {
        let selectors: Vec<(&str, &str, LabelSelector)> = vec![
            (TARGET_SELECTOR_EMPTY, "all pods", empty_selector()),
            (TARGET_MATCH_LABELS, "pod label", match_labels(&[("pod", self.a.as_str())])),
            (
                TARGET_MATCH_EXPRESSIONS,
                "pod In",
                match_expression("pod", "In", &[self.a.as_str(), self.b.as_str()]),
            ),
            (
                TARGET_MATCH_EXPRESSIONS,
                "pod NotIn",
                match_expression("pod", "NotIn", &[self.a.as_str()]),
            ),
            (TARGET_MATCH_EXPRESSIONS, "pod Exists", match_expression("pod", "Exists", &[])),
            (
                TARGET_MATCH_EXPRESSIONS,
                "app DoesNotExist",
                match_expression("app", "DoesNotExist", &[]),
            ),
        ];

        let mut cases = Vec::new();
        for (tag, description, selector) in selectors {
            for dir in Dir::BOTH {
                let mut tags = dir.tags().to_vec();
                tags.extend([tag, RULES_NIL, DENY_ALL]);
                let netpol = Netpol::new(self.x.as_str(), "target").target(selector.clone());
                cases.push(self.single_policy_case(
                    format!("deny all {} to target selected by {}", dir.name(), description),
                    tags,
                    dir.policy(netpol, None),
                ));
            }
        }
        cases
    }

    fn port_specs(&self) -> Vec<(Vec<&'static str>, Option<Vec<NetworkPolicyPort>>, ProbeConfig)> {
        let mut specs = vec![
            (vec![PORT_NIL], None, ProbeConfig::AllAvailable),
            (vec![PORT_EMPTY], Some(vec![]), ProbeConfig::AllAvailable),
            (
                vec![PORT_NUMBERED, PROTOCOL_TCP],
                Some(vec![numbered_port(self.port, None)]),
                ProbeConfig::AllAvailable,
            ),
            (
                vec![PORT_RANGE, PROTOCOL_TCP],
                Some(vec![port_range(
                    self.port.min(self.other_port),
                    self.port.max(self.other_port),
                    Protocol::Tcp,
                )]),
                ProbeConfig::AllAvailable,
            ),
        ];

        for protocol in &self.options.protocols {
            let protocol = *protocol;
            specs.push((
                vec![PORT_NUMBERED, protocol_tag(protocol)],
                Some(vec![numbered_port(self.port, Some(protocol))]),
                ProbeConfig::AllAvailable,
            ));
            specs.push((
                vec![PORT_NAMED, protocol_tag(protocol)],
                Some(vec![named_port(&named(self.port, protocol), protocol)]),
                ProbeConfig::port_protocol(PortValue::Name(named(self.port, protocol)), protocol),
            ));
            specs.push((
                vec![PORT_PROTOCOL_ONLY, protocol_tag(protocol)],
                Some(vec![protocol_only(protocol)]),
                ProbeConfig::AllAvailable,
            ));
        }

        if self.options.protocols.contains(&Protocol::Udp) {
            // a TCP port name requested over UDP resolves to nothing
            specs.push((
                vec![PORT_NAMED, PROTOCOL_UDP],
                Some(vec![named_port(&named(self.port, Protocol::Tcp), Protocol::Udp)]),
                ProbeConfig::port_protocol(
                    PortValue::Name(named(self.port, Protocol::Tcp)),
                    Protocol::Udp,
                ),
            ));
            specs.push((
                vec![PORT_NUMBERED, PROTOCOL_TCP, PROTOCOL_UDP],
                Some(vec![
                    numbered_port(self.port, Some(Protocol::Tcp)),
                    numbered_port(self.other_port, Some(Protocol::Udp)),
                ]),
                ProbeConfig::AllAvailable,
            ));
        }
        specs
    }

    fn port_cases(&self) -> Vec<TestCase> {
        let mut cases = Vec::new();
        for (index, (port_tags, ports, probe)) in self.port_specs().into_iter().enumerate() {
            for dir in Dir::BOTH {
                let mut tags = dir.tags().to_vec();
                tags.extend(port_tags.iter().copied());
                tags.extend([RULES_ONE, PEER_NIL]);
                let policy = dir.policy(
                    self.target_netpol("ports"),
                    Some(vec![Rule::new(ports.clone(), None)]),
                );
                cases.push(TestCase::new(
                    format!("{} port spec #{}: {}", dir.name(), index, port_tags.join(", ")),
                    tags,
                    vec![TestStep::new(probe.clone(), vec![Action::create_policy(policy)])],
                ));
            }
        }
        cases
    }

    fn ip_block_cidr(&self) -> String {
        let prefix = if self.options.pod_ip.is_ipv4() { 24 } else { 64 };
        IpNet::new(self.options.pod_ip, prefix)
            .map(|net| net.trunc().to_string())
            .unwrap_or_else(|_| format!("{}/{}", self.options.pod_ip, prefix))
    }

    fn ip_block_except(&self) -> String {
        let prefix = if self.options.pod_ip.is_ipv4() { 32 } else { 128 };
        format!("{}/{}", self.options.pod_ip, prefix)
    }

    fn peer_specs(&self) -> Vec<(Vec<&'static str>, Option<Vec<NetworkPolicyPeer>>)> {
        vec![
            (vec![PEER_NIL], None),
            (vec![PEER_EMPTY], Some(vec![])),
            (
                vec![POD_SELECTOR_ONLY, NAMESPACE_SELECTOR_NIL],
                Some(vec![pod_peer(None, Some(self.pod_b()))]),
            ),
            (
                vec![POD_SELECTOR_EMPTY, NAMESPACE_SELECTOR_NIL],
                Some(vec![pod_peer(None, Some(empty_selector()))]),
            ),
            (
                vec![POD_SELECTOR_EXPRESSIONS, NAMESPACE_SELECTOR_NIL],
                Some(vec![pod_peer(None, Some(match_expression("pod", "NotIn", &[self.b.as_str()])))]),
            ),
            (
                vec![NAMESPACE_SELECTOR_ONLY],
                Some(vec![pod_peer(Some(self.namespace_y()), None)]),
            ),
            (
                vec![NAMESPACE_SELECTOR_EMPTY],
                Some(vec![pod_peer(Some(empty_selector()), None)]),
            ),
            (
                vec![POD_AND_NAMESPACE_SELECTOR],
                Some(vec![pod_peer(Some(self.namespace_y()), Some(self.pod_b()))]),
            ),
            (
                vec![POD_AND_NAMESPACE_SELECTOR, NAMESPACE_SELECTOR_EMPTY],
                Some(vec![pod_peer(Some(empty_selector()), Some(self.pod_b()))]),
            ),
            (
                vec![PEER_IPBLOCK],
                Some(vec![ip_block_peer(&self.ip_block_cidr(), &[])]),
            ),
            (
                vec![PEER_IPBLOCK, PEER_IPBLOCK_EXCEPT],
                Some(vec![ip_block_peer(&self.ip_block_cidr(), &[self.ip_block_except()])]),
            ),
            (
                vec![PEERS_TWO, POD_SELECTOR_ONLY, NAMESPACE_SELECTOR_ONLY],
                Some(vec![
                    pod_peer(None, Some(self.pod_b())),
                    pod_peer(Some(self.namespace_y()), None),
                ]),
            ),
        ]
    }

    fn peer_cases(&self) -> Vec<TestCase> {
        let mut cases = Vec::new();
        for (index, (peer_tags, peers)) in self.peer_specs().into_iter().enumerate() {
            for dir in Dir::BOTH {
                let mut tags = dir.tags().to_vec();
                tags.extend(peer_tags.iter().copied());
                tags.extend([RULES_ONE, PORT_NIL]);
                let policy = dir.policy(
                    self.target_netpol("peers"),
                    Some(vec![Rule::new(None, peers.clone())]),
                );
                cases.push(self.single_policy_case(
                    format!("{} peer spec #{}: {}", dir.name(), index, peer_tags.join(", ")),
                    tags,
                    policy,
                ));
            }
        }
        cases
    }

    fn multi_policy_cases(&self) -> Vec<TestCase> {
        let and_policy = self
            .target_netpol("accidental-and")
            .ingress(Some(vec![Rule::peers(vec![pod_peer(
                Some(self.namespace_y()),
                Some(self.pod_b()),
            )])]))
            .build();
        let or_policy = self
            .target_netpol("accidental-or")
            .ingress(Some(vec![Rule::peers(vec![
                pod_peer(Some(self.namespace_y()), None),
                pod_peer(None, Some(self.pod_b())),
            ])]))
            .build();

        vec![
            TestCase::new(
                "deny all and allow all ingress combine to allow all",
                [DENY_ALL, ALLOW_ALL, INGRESS_ONLY, HAS_INGRESS],
                vec![TestStep::create_policies(vec![
                    deny_all_ingress(self.x.as_str(), "deny-all"),
                    allow_all_ingress(self.x.as_str(), "allow-all"),
                ])],
            ),
            TestCase::new(
                "namespace and pod selector in one peer",
                [ACCIDENTAL_AND, POD_AND_NAMESPACE_SELECTOR, INGRESS_ONLY, HAS_INGRESS],
                vec![TestStep::create_policies(vec![and_policy])],
            ),
            TestCase::new(
                "namespace and pod selector in separate peers",
                [ACCIDENTAL_OR, PEERS_TWO, INGRESS_ONLY, HAS_INGRESS],
                vec![TestStep::create_policies(vec![or_policy])],
            ),
            TestCase::new(
                "deny ingress and deny egress from separate policies",
                [SPLIT_DIRECTIONS, DENY_ALL, HAS_INGRESS, HAS_EGRESS],
                vec![TestStep::create_policies(vec![
                    deny_all_ingress(self.x.as_str(), "deny-ingress"),
                    deny_all_egress(self.x.as_str(), "deny-egress"),
                ])],
            ),
        ]
    }

    fn action_cases(&self) -> Vec<TestCase> {
        let all = ProbeConfig::AllAvailable;
        let step = |actions: Vec<Action>| TestStep::new(all.clone(), actions);

        let from_api = self
            .target_netpol("allow-api")
            .ingress(Some(vec![Rule::peers(vec![pod_peer(
                Some(empty_selector()),
                Some(match_labels(&[("role", "api")])),
            )])]))
            .build();
        let from_alice = self
            .target_netpol("allow-alice")
            .ingress(Some(vec![Rule::peers(vec![pod_peer(
                Some(match_labels(&[("user", "alice")])),
                None,
            )])]))
            .build();
        let namespaces = self.options.namespaces.clone();

        vec![
            TestCase::new(
                "pod gains the label an ingress rule selects",
                [SET_POD_LABELS, MULTI_STEP, POD_AND_NAMESPACE_SELECTOR, HAS_INGRESS],
                vec![
                    step(vec![Action::create_policy(from_api)]),
                    step(vec![Action::set_pod_labels(
                        self.x.as_str(),
                        self.b.as_str(),
                        labels(&[("pod", self.b.as_str()), ("role", "api")]),
                    )]),
                ],
            ),
            TestCase::new(
                "namespace gains the label an ingress rule selects",
                [SET_NAMESPACE_LABELS, MULTI_STEP, NAMESPACE_SELECTOR_ONLY, HAS_INGRESS],
                vec![
                    step(vec![Action::create_policy(from_alice)]),
                    step(vec![Action::set_namespace_labels(
                        self.y.as_str(),
                        labels(&[("ns", self.y.as_str()), ("user", "alice")]),
                    )]),
                ],
            ),
            TestCase::new(
                "deny all ingress updated to allow all",
                [UPDATE_POLICY, CREATE_POLICY, MULTI_STEP, DENY_ALL, ALLOW_ALL, HAS_INGRESS],
                vec![
                    step(vec![Action::create_policy(deny_all_ingress(self.x.as_str(), "flip"))]),
                    step(vec![Action::update_policy(allow_all_ingress(self.x.as_str(), "flip"))]),
                ],
            ),
            TestCase::new(
                "deny all ingress then delete it",
                [DELETE_POLICY, CREATE_POLICY, MULTI_STEP, DENY_ALL, HAS_INGRESS],
                vec![
                    step(vec![Action::create_policy(deny_all_ingress(self.x.as_str(), "deny-all"))]),
                    step(vec![Action::delete_policy(self.x.as_str(), "deny-all")]),
                ],
            ),
            TestCase::new(
                "policies read back from the cluster",
                [READ_POLICIES, CREATE_POLICY, MULTI_STEP, DENY_ALL, HAS_EGRESS],
                vec![
                    step(vec![Action::create_policy(deny_all_egress(self.x.as_str(), "deny-egress"))]),
                    step(vec![Action::read_policies(&namespaces)]),
                ],
            ),
            TestCase::new(
                "pod created and deleted under a deny all policy",
                [CREATE_POD, DELETE_POD, MULTI_STEP, DENY_ALL, HAS_INGRESS],
                vec![
                    step(vec![Action::create_policy(deny_all_ingress(self.x.as_str(), "deny-all"))]),
                    step(vec![Action::CreatePod {
                        namespace: self.x.clone(),
                        pod: EXTRA_POD.to_string(),
                        labels: labels(&[("pod", EXTRA_POD)]),
                    }]),
                    step(vec![Action::DeletePod {
                        namespace: self.x.clone(),
                        pod: EXTRA_POD.to_string(),
                    }]),
                ],
            ),
            TestCase::new(
                "namespace created and deleted next to an egress policy",
                [CREATE_NAMESPACE, DELETE_NAMESPACE, CREATE_POD, MULTI_STEP, HAS_EGRESS],
                vec![
                    step(vec![
                        Action::create_policy(
                            self.target_netpol("egress-to-y")
                                .egress(Some(vec![Rule::peers(vec![pod_peer(
                                    Some(self.namespace_y()),
                                    None,
                                )])]))
                                .build(),
                        ),
                        Action::CreateNamespace {
                            namespace: EXTRA_NAMESPACE.to_string(),
                            labels: labels(&[("ns", EXTRA_NAMESPACE)]),
                        },
                        Action::CreatePod {
                            namespace: EXTRA_NAMESPACE.to_string(),
                            pod: EXTRA_POD.to_string(),
                            labels: labels(&[("pod", EXTRA_POD)]),
                        },
                    ]),
                    step(vec![Action::DeleteNamespace {
                        namespace: EXTRA_NAMESPACE.to_string(),
                    }]),
                ],
            ),
        ]
    }
}

/// Append a DNS egress rule to every policy with the Egress type
pub fn allow_dns(case: &mut TestCase, dns_port: u16) {
    for step in &mut case.steps {
        for action in &mut step.actions {
            let Some(spec) = action.policy_mut().and_then(|p| p.spec.as_mut()) else {
                continue;
            };
            let has_egress = spec
                .policy_types
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|t| t == POLICY_TYPE_EGRESS);
            if has_egress {
                spec.egress.get_or_insert_with(Vec::new).push(dns_rule(dns_port));
            }
        }
    }
}

/// Keep cases tagged with any of `include` (or all cases when it is empty)
/// and with none of `exclude`. Category names expand to their tags.
pub fn filter_test_cases(cases: Vec<TestCase>, include: &[String], exclude: &[String]) -> Vec<TestCase> {
    let include = tags::expand(include);
    let exclude = tags::expand(exclude);
    cases
        .into_iter()
        .filter(|c| include.is_empty() || c.has_any_tag(&include))
        .filter(|c| !c.has_any_tag(&exclude))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use netpol_core::{build_network_policies, with_default_policy_types, Direction};

    fn generator(allow_dns: bool) -> Generator {
        Generator::new(GeneratorOptions {
            allow_dns,
            ..Default::default()
        })
    }

    #[test]
    fn test_every_case_compiles_and_is_tagged() {
        let cases = generator(true).generate_all();
        assert!(cases.len() > 80, "only {} cases", cases.len());
        for case in &cases {
            assert!(!case.tags.is_empty(), "{} has no tags", case.description);
            for tag in &case.tags {
                assert!(tags::is_known(tag), "{} has unknown tag {}", case.description, tag);
            }
            let policies: Vec<_> = case
                .policies()
                .into_iter()
                .map(with_default_policy_types)
                .collect();
            build_network_policies(false, &policies).unwrap();
        }
    }

    #[test]
    fn test_include_exclude() {
        let g = generator(false);
        let all = g.generate_all().len();
        assert_eq!(g.generate(&[], &[]).len(), all);

        let ipblock = g.generate(&["peer-ipblock".to_string()], &[]);
        assert_eq!(ipblock.len(), 4);
        assert!(ipblock.iter().all(|c| c.tags.contains(PEER_IPBLOCK)));

        let no_except = g.generate(&["peer-ipblock".to_string()], &["peer-ipblock-except".to_string()]);
        assert_eq!(no_except.len(), 2);

        let actions = g.generate(&["action".to_string()], &[]);
        assert_eq!(actions.len(), 7);
        assert!(actions.iter().all(|c| c.steps.len() >= 2));
    }

    #[test]
    fn test_allow_dns_only_touches_egress() {
        let with_dns = generator(true).generate(&["egress-only".to_string()], &[]);
        for case in &with_dns {
            for policy in case.policies() {
                let egress = policy.spec.as_ref().unwrap().egress.as_ref().unwrap();
                let last = egress.last().unwrap();
                assert!(last.to.is_none());
                assert_eq!(last.ports.as_ref().unwrap().len(), 2);
            }
        }

        let ingress = generator(true).generate(&["ingress-only".to_string()], &["has-egress".to_string()]);
        for case in &ingress {
            for policy in case.policies() {
                assert!(policy.spec.as_ref().unwrap().egress.is_none());
            }
        }
    }

    #[test]
    fn test_ip_block_cidrs() {
        let g = generator(false);
        assert_eq!(g.ip_block_cidr(), "192.168.0.0/24");
        assert_eq!(g.ip_block_except(), "192.168.0.1/32");

        let v6 = Generator::new(GeneratorOptions {
            pod_ip: "fd00::5".parse().unwrap(),
            ..Default::default()
        });
        assert_eq!(v6.ip_block_cidr(), "fd00::/64");
    }

    #[test]
    fn test_named_port_cases_probe_by_name() {
        let cases = generator(false).generate(&["port-named".to_string()], &[]);
        assert!(!cases.is_empty());
        for case in &cases {
            assert!(matches!(
                case.steps[0].probe,
                ProbeConfig::PortProtocol { port: PortValue::Name(_), .. }
            ));
        }
    }

    #[test]
    fn test_features_cover_generated_corpus() {
        let cases = generator(false).generate_all();
        let features = Features::from_policies(cases.iter().flat_map(|c| c.policies()));
        assert!(features.ingress_peer.contains("ipblock-except"));
        assert!(features.egress_port.contains("port-range"));
        assert!(features.target.contains("target-match-expressions"));
    }

    #[test]
    fn test_policy_without_directions_isolates_ingress() {
        let cases = generator(true).generate(&["no-direction".to_string()], &[]);
        assert_eq!(cases.len(), 1);
        let policy = cases[0].policies()[0];
        let spec = policy.spec.as_ref().unwrap();
        assert_eq!(spec.policy_types, Some(vec![]));
        assert!(spec.ingress.is_none() && spec.egress.is_none());

        let compiled = build_network_policies(false, &[with_default_policy_types(policy)]).unwrap();
        assert_eq!(compiled.targets(Direction::Ingress).count(), 1);
        assert_eq!(compiled.targets(Direction::Egress).count(), 0);

        let shapes = generator(false).generate(&["policy-shape".to_string()], &[]);
        assert!(shapes.iter().any(|c| c.tags.contains(NO_DIRECTION)));
    }
}

//! コンテナ実行環境の構築
//!
//! レジストリ → クラスター → タスク定義 → サービス の順に解決する。
//! タスク定義のコンテナ間参照（依存・マウント・シークレット・エンドポイント）は
//! ここで全て検証し、計画生成時に失敗させる。

use super::database::DataStores;
use super::secret::SecretStore;
use super::security::{AccessPolicy, substitute_statements};
use super::{require_subnets, resolve_removal_policy};
use crate::context::DeployContext;
use crate::error::{Result, StackError};
use crate::model::{
    ClusterSpec, ContainerSpec, EndpointRef, EnvValue, ImageRef, Network, RemovalPolicy,
    SecurityGroup, ServiceSpec, StackSpec, TaskDefinitionSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// 解決済みイメージレジストリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub name: String,
    pub repository_name: Option<String>,
    pub removal_policy: RemovalPolicy,
    /// 削除時にイメージを自動で空にする
    pub auto_delete_images: bool,
    pub image_scan_on_push: bool,
}

/// 解決済みタスク定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub memory: u32,
    pub cpu: u32,
    pub volumes: Vec<String>,
    /// 宣言順
    pub containers: Vec<ContainerSpec>,
    /// 依存関係を満たす起動順
    pub start_order: Vec<String>,
    /// プレースホルダ置換済み
    pub task_role_statements: Vec<crate::model::PolicyStatement>,
    pub bucket_grants: Vec<String>,
}

impl TaskDefinition {
    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// いずれかのコンテナが指定ポートを公開しているか
    pub fn exposes(&self, port: u16) -> bool {
        self.containers.iter().any(|c| c.exposes(port))
    }
}

/// コンテナ実行環境一式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compute {
    pub registries: BTreeMap<String, Registry>,
    pub clusters: BTreeMap<String, ClusterSpec>,
    pub task_definitions: BTreeMap<String, TaskDefinition>,
    pub services: BTreeMap<String, ServiceSpec>,
}

impl Compute {
    /// サービスにバインドされたタスク定義
    pub fn task_of(&self, service: &str) -> Option<&TaskDefinition> {
        self.services
            .get(service)
            .and_then(|s| self.task_definitions.get(&s.task_definition))
    }
}

/// サービスにグループ指定がない場合に作るグループ名
pub fn implicit_service_group(service: &str) -> String {
    format!("{}-service", service)
}

/// レジストリ・クラスター・タスク定義・サービスを構築
///
/// サービス用の暗黙グループを追加したアクセスポリシーも返す。
#[instrument(skip_all, fields(tasks = spec.task_definitions.len(), services = spec.services.len()))]
pub fn build_compute(
    spec: &StackSpec,
    ctx: &DeployContext,
    network: &Network,
    mut access: AccessPolicy,
    secrets: &SecretStore,
    data: &DataStores,
) -> Result<(Compute, AccessPolicy)> {
    let mut compute = Compute::default();

    for registry in spec.registries.values() {
        let removal_policy = resolve_removal_policy(registry.removal_policy, ctx);
        compute.registries.insert(
            registry.name.clone(),
            Registry {
                name: registry.name.clone(),
                repository_name: registry.repository_name.clone(),
                removal_policy,
                auto_delete_images: removal_policy == RemovalPolicy::Destroy,
                image_scan_on_push: registry.image_scan_on_push,
            },
        );
    }

    compute.clusters = spec.clusters.clone();

    for task in spec.task_definitions.values() {
        let resolved = build_task_definition(task, spec, ctx, &compute, secrets, data)?;
        compute.task_definitions.insert(task.name.clone(), resolved);
    }

    for service in spec.services.values() {
        let referrer = format!("service '{}'", service.name);
        if !compute.clusters.contains_key(&service.cluster) {
            return Err(StackError::UnknownResource {
                kind: "cluster",
                name: service.cluster.clone(),
                referrer,
            });
        }
        if !compute
            .task_definitions
            .contains_key(&service.task_definition)
        {
            return Err(StackError::UnknownResource {
                kind: "task_definition",
                name: service.task_definition.clone(),
                referrer,
            });
        }
        require_subnets(network, service.subnet_type, &referrer)?;

        let mut resolved = service.clone();
        if resolved.security_groups.is_empty() {
            let group = implicit_service_group(&service.name);
            access = access.with_group(SecurityGroup::new(
                &group,
                format!("Security group for service {}", service.name),
            ))?;
            resolved.security_groups.push(group);
        }
        for group in &resolved.security_groups {
            access.require_group(group, &referrer)?;
        }

        debug!(service = %service.name, desired_count = service.desired_count, "Service resolved");
        compute.services.insert(service.name.clone(), resolved);
    }

    Ok((compute, access))
}

fn build_task_definition(
    task: &TaskDefinitionSpec,
    spec: &StackSpec,
    ctx: &DeployContext,
    compute: &Compute,
    secrets: &SecretStore,
    data: &DataStores,
) -> Result<TaskDefinition> {
    if task.containers.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "タスク定義 '{}' にはコンテナが1つ以上必要です",
            task.name
        )));
    }

    let mut names = BTreeSet::new();
    for container in &task.containers {
        if !names.insert(container.name.as_str()) {
            return Err(StackError::DuplicateResource {
                kind: "container",
                name: format!("{}/{}", task.name, container.name),
            });
        }
    }

    for container in &task.containers {
        let consumer = format!("{}/{}", task.name, container.name);

        match &container.image {
            None => return Err(StackError::MissingImage(consumer)),
            Some(ImageRef::Registry { registry, .. }) => {
                if !compute.registries.contains_key(registry) {
                    return Err(StackError::UnknownResource {
                        kind: "registry",
                        name: registry.clone(),
                        referrer: consumer,
                    });
                }
            }
            Some(ImageRef::External { .. }) => {}
        }

        for dependency in &container.depends_on {
            if !names.contains(dependency.container.as_str()) {
                return Err(StackError::UndeclaredContainer {
                    task: task.name.clone(),
                    container: container.name.clone(),
                    dependency: dependency.container.clone(),
                });
            }
        }

        for mount in &container.mount_points {
            if !task.volumes.contains(&mount.source_volume) {
                return Err(StackError::UndeclaredVolume {
                    task: task.name.clone(),
                    container: container.name.clone(),
                    volume: mount.source_volume.clone(),
                });
            }
        }

        for reference in container.secrets.values() {
            secrets.resolve(reference, &consumer)?;
        }

        for value in container.environment.values() {
            if let EnvValue::Endpoint(endpoint) = value {
                require_endpoint(endpoint, spec, data, &consumer)?;
            }
        }
    }

    for bucket in &task.bucket_grants {
        if !spec.buckets.contains_key(bucket) {
            return Err(StackError::UnknownResource {
                kind: "bucket",
                name: bucket.clone(),
                referrer: format!("task_definition '{}'", task.name),
            });
        }
    }

    let start_order = start_order(task)?;

    Ok(TaskDefinition {
        name: task.name.clone(),
        memory: task.memory,
        cpu: task.cpu,
        volumes: task.volumes.clone(),
        containers: task.containers.clone(),
        start_order,
        task_role_statements: substitute_statements(&task.task_role_statements, ctx),
        bucket_grants: task.bucket_grants.clone(),
    })
}

/// エンドポイント参照が宣言済みのリソースを指しているか
pub(crate) fn require_endpoint(
    endpoint: &EndpointRef,
    spec: &StackSpec,
    data: &DataStores,
    consumer: &str,
) -> Result<()> {
    let (kind, exists) = match endpoint {
        EndpointRef::Database(name) => ("database", data.databases.contains_key(name)),
        EndpointRef::Proxy(name) => ("proxy", data.proxies.contains_key(name)),
        // ロードバランサーはこの後で構築されるため宣言だけを見る
        EndpointRef::LoadBalancer(name) => ("load_balancer", spec.load_balancers.contains_key(name)),
    };
    if exists {
        Ok(())
    } else {
        Err(StackError::UnknownResource {
            kind,
            name: endpoint.name().to_string(),
            referrer: consumer.to_string(),
        })
    }
}

/// コンテナの起動順を求める（依存先が先）
///
/// 同順位は宣言順を保つ。循環があればエラー。
fn start_order(task: &TaskDefinitionSpec) -> Result<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit<'a>(
        task: &'a TaskDefinitionSpec,
        index: usize,
        marks: &mut [Mark],
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        let container = &task.containers[index];
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                let start = path
                    .iter()
                    .position(|n| *n == container.name)
                    .unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(&container.name);
                return Err(StackError::CircularDependency {
                    task: task.name.clone(),
                    cycle: cycle.join(" -> "),
                });
            }
            Mark::Unvisited => {}
        }

        marks[index] = Mark::Visiting;
        path.push(&container.name);
        for dependency in &container.depends_on {
            if let Some(dep_index) = task
                .containers
                .iter()
                .position(|c| c.name == dependency.container)
            {
                visit(task, dep_index, marks, path, order)?;
            }
        }
        path.pop();
        marks[index] = Mark::Done;
        order.push(container.name.clone());
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; task.containers.len()];
    let mut order = Vec::with_capacity(task.containers.len());
    let mut path = Vec::new();
    for index in 0..task.containers.len() {
        visit(task, index, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::network::build_network;
    use crate::model::{
        ContainerDependency, DependencyCondition, GeneratedField, MountPoint, NetworkSpec,
        PortMapping, Protocol, RegistrySpec, SecretRef, SecretSpec, SecretTemplate,
    };

    fn ctx() -> DeployContext {
        DeployContext::new("123456789012", "ap-northeast-1")
    }

    fn container(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: Some(ImageRef::External {
                image: "nginx:latest".to_string(),
            }),
            ..Default::default()
        }
    }

    fn depends(container: &mut ContainerSpec, on: &str) {
        container.depends_on.push(ContainerDependency {
            container: on.to_string(),
            condition: DependencyCondition::Start,
        });
    }

    fn stack_with_task(containers: Vec<ContainerSpec>, volumes: Vec<&str>) -> StackSpec {
        let mut spec = StackSpec::new("test");
        spec.clusters.insert(
            "main".to_string(),
            ClusterSpec {
                name: "main".to_string(),
                ..Default::default()
            },
        );
        spec.task_definitions.insert(
            "web".to_string(),
            TaskDefinitionSpec {
                name: "web".to_string(),
                memory: 1024,
                cpu: 512,
                volumes: volumes.into_iter().map(|v| v.to_string()).collect(),
                containers,
                ..Default::default()
            },
        );
        spec
    }

    fn build(spec: &StackSpec) -> Result<(Compute, AccessPolicy)> {
        let network = build_network(&NetworkSpec::default(), &ctx())?;
        let access = AccessPolicy::build(spec, &ctx())?;
        let secrets = SecretStore::build(spec);
        build_compute(spec, &ctx(), &network, access, &secrets, &DataStores::default())
    }

    #[test]
    fn test_dependency_on_undeclared_container_fails() {
        let mut a = container("A");
        depends(&mut a, "B");
        let spec = stack_with_task(vec![a], vec![]);

        match build(&spec) {
            Err(StackError::UndeclaredContainer {
                task,
                container,
                dependency,
            }) => {
                assert_eq!(task, "web");
                assert_eq!(container, "A");
                assert_eq!(dependency, "B");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_start_order_follows_dependencies() {
        let mut django = container("django");
        depends(&mut django, "migrate");
        let mut nginx = container("nginx");
        depends(&mut nginx, "django");
        let spec = stack_with_task(vec![nginx, django, container("migrate")], vec![]);

        let (compute, _) = build(&spec).unwrap();
        assert_eq!(
            compute.task_definitions["web"].start_order,
            vec!["migrate", "django", "nginx"]
        );
    }

    #[test]
    fn test_circular_dependency_fails() {
        let mut a = container("a");
        depends(&mut a, "b");
        let mut b = container("b");
        depends(&mut b, "a");
        let spec = stack_with_task(vec![a, b], vec![]);

        match build(&spec) {
            Err(StackError::CircularDependency { cycle, .. }) => assert_eq!(cycle, "a -> b -> a"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_undeclared_volume_fails() {
        let mut nginx = container("nginx");
        nginx.mount_points.push(MountPoint {
            source_volume: "static".to_string(),
            container_path: "/static".to_string(),
            read_only: true,
        });
        let spec = stack_with_task(vec![nginx.clone()], vec![]);
        assert!(matches!(
            build(&spec),
            Err(StackError::UndeclaredVolume { ref volume, .. }) if volume == "static"
        ));

        let spec = stack_with_task(vec![nginx], vec!["static"]);
        assert!(build(&spec).is_ok());
    }

    #[test]
    fn test_secret_field_must_be_declared() {
        let mut django = container("django");
        django.secrets.insert(
            "DJANGO_SECRET_KEY".to_string(),
            SecretRef::new("django", Some("apiKey")),
        );
        let mut spec = stack_with_task(vec![django], vec![]);
        spec.secrets.insert(
            "django".to_string(),
            SecretSpec {
                name: "django".to_string(),
                secret_name: None,
                template: SecretTemplate {
                    generate: Some(GeneratedField::new("secretKey")),
                    ..Default::default()
                },
            },
        );

        match build(&spec) {
            Err(StackError::UndeclaredSecretKey { consumer, key, .. }) => {
                assert_eq!(consumer, "web/django");
                assert_eq!(key, "apiKey");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_container_and_empty_task() {
        let spec = stack_with_task(vec![container("a"), container("a")], vec![]);
        assert!(matches!(
            build(&spec),
            Err(StackError::DuplicateResource {
                kind: "container",
                ..
            })
        ));

        let spec = stack_with_task(vec![], vec![]);
        assert!(matches!(build(&spec), Err(StackError::InvalidConfig(_))));
    }

    #[test]
    fn test_registry_image_requires_registry() {
        let mut app = container("app");
        app.image = Some(ImageRef::Registry {
            registry: "app".to_string(),
            tag: "latest".to_string(),
        });
        let mut spec = stack_with_task(vec![app], vec![]);
        assert!(matches!(
            build(&spec),
            Err(StackError::UnknownResource {
                kind: "registry",
                ..
            })
        ));

        spec.registries.insert(
            "app".to_string(),
            RegistrySpec {
                name: "app".to_string(),
                ..Default::default()
            },
        );
        let (compute, _) = build(&spec).unwrap();
        assert!(compute.registries["app"].auto_delete_images);
    }

    #[test]
    fn test_missing_image_fails() {
        let mut app = container("app");
        app.image = None;
        let spec = stack_with_task(vec![app], vec![]);
        assert!(matches!(build(&spec), Err(StackError::MissingImage(_))));
    }

    #[test]
    fn test_endpoint_must_exist() {
        let mut django = container("django");
        django.environment.insert(
            "DATABASE_HOST".to_string(),
            EnvValue::Endpoint(EndpointRef::Proxy("products-proxy".to_string())),
        );
        let spec = stack_with_task(vec![django], vec![]);
        assert!(matches!(
            build(&spec),
            Err(StackError::UnknownResource { kind: "proxy", .. })
        ));
    }

    #[test]
    fn test_service_gets_implicit_group() {
        let mut nginx = container("nginx");
        nginx.port_mappings.push(PortMapping {
            container_port: 80,
            host_port: None,
            protocol: Protocol::Tcp,
        });
        let mut spec = stack_with_task(vec![nginx], vec![]);
        spec.services.insert(
            "web".to_string(),
            ServiceSpec {
                name: "web".to_string(),
                cluster: "main".to_string(),
                task_definition: "web".to_string(),
                ..Default::default()
            },
        );

        let (compute, access) = build(&spec).unwrap();
        assert_eq!(
            compute.services["web"].security_groups,
            vec!["web-service".to_string()]
        );
        assert!(access.group("web-service").is_some());
        assert!(compute.task_of("web").unwrap().exposes(80));
    }

    #[test]
    fn test_service_unknown_cluster() {
        let mut spec = stack_with_task(vec![container("nginx")], vec![]);
        spec.services.insert(
            "web".to_string(),
            ServiceSpec {
                name: "web".to_string(),
                cluster: "other".to_string(),
                task_definition: "web".to_string(),
                ..Default::default()
            },
        );
        assert!(matches!(
            build(&spec),
            Err(StackError::UnknownResource { kind: "cluster", .. })
        ));
    }
}

use super::*;
use crate::model::{
    ActionKind, AggregateKey, DependencyCondition, EndpointRef, Engine, EnvValue, FunctionCode,
    ImageRef, ListenerAction, MachineImage, MetricRef, OriginRef, Peer, PortRange, Protocol,
    SubnetType,
};

#[test]
fn test_parse_stack_header() {
    let kdl = r#"
        stack "products" {
            description "Product management system"
            removal_policy "retain"
        }
    "#;

    let spec = parse_kdl_string(kdl, "fallback".to_string()).unwrap();
    assert_eq!(spec.name, "products");
    assert_eq!(spec.description.as_deref(), Some("Product management system"));
    assert_eq!(spec.removal_policy, Some(RemovalPolicy::Retain));
}

#[test]
fn test_default_name_without_header() {
    let spec = parse_kdl_string("", "myapp".to_string()).unwrap();
    assert_eq!(spec.name, "myapp");
    assert_eq!(spec.declaration_count(), 0);
}

#[test]
fn test_parse_network() {
    let kdl = r#"
        network "main" {
            cidr "10.1.0.0/16"
            max_azs 3
            nat_gateways 2
            subnet "public" cidr_mask=24
            subnet "app" type="private" cidr_mask=22
            subnet "isolated"
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let network = spec.network.unwrap();
    assert_eq!(network.name, "main");
    assert_eq!(network.cidr, "10.1.0.0/16");
    assert_eq!(network.max_azs, 3);
    assert_eq!(network.nat_gateways, 2);
    assert_eq!(network.subnets.len(), 3);
    assert_eq!(network.subnets[0].subnet_type, SubnetType::Public);
    assert_eq!(network.subnets[1].subnet_type, SubnetType::Private);
    assert_eq!(network.subnets[1].cidr_mask, 22);
    assert_eq!(network.subnets[2].subnet_type, SubnetType::Isolated);
    assert_eq!(network.subnets[2].cidr_mask, 24);
}

#[test]
fn test_untyped_subnet_with_plain_name_uses_default_type() {
    let kdl = r#"
        network {
            subnet "app" cidr_mask=24
            subnet "web" type="public"
        }
    "#;
    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let network = spec.network.unwrap();
    assert_eq!(network.subnets[0].subnet_type, SubnetType::Private);
    assert_eq!(network.subnets[1].subnet_type, SubnetType::Public);
}

#[test]
fn test_unknown_subnet_type_is_error() {
    let kdl = r#"
        network {
            subnet "app" type="dmz"
        }
    "#;
    assert!(matches!(
        parse_kdl_string(kdl, "test".to_string()),
        Err(StackError::InvalidConfig(_))
    ));
}

#[test]
fn test_network_defaults_when_no_subnets() {
    let spec = parse_kdl_string(r#"network { max_azs 2 }"#, "test".to_string()).unwrap();
    let network = spec.network.unwrap();
    assert_eq!(network.name, "vpc");
    assert_eq!(network.subnets.len(), 2);
}

#[test]
fn test_duplicate_network_is_error() {
    let kdl = r#"
        network "a"
        network "b"
    "#;
    let result = parse_kdl_string(kdl, "test".to_string());
    assert!(matches!(
        result,
        Err(StackError::DuplicateResource { kind: "network", .. })
    ));
}

#[test]
fn test_invalid_cidr_mask() {
    let kdl = r#"
        network {
            subnet "public" cidr_mask=30
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_security_group_rules() {
    let kdl = r#"
        security_group "alb" {
            description "Load balancer"
            ingress "any-ipv4" port=80
        }
        security_group "ecs" {
            allow_all_outbound #false
            ingress "group:alb" port=8000 description="Allow access from ALB"
            egress "10.0.0.0/16" from=1024 to=65535
            egress "any" protocol="all"
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(spec.security_groups.len(), 2);

    let alb = &spec.security_groups["alb"];
    assert_eq!(alb.rules.len(), 1);
    assert_eq!(alb.rules[0].peer, Peer::any_ipv4());
    assert_eq!(alb.rules[0].ports, PortRange::single(80));
    assert_eq!(alb.rules[0].description, "from 0.0.0.0/0:80");

    let ecs = &spec.security_groups["ecs"];
    assert_eq!(ecs.allow_all_outbound, Some(false));
    assert_eq!(ecs.rules[0].peer, Peer::Group("alb".to_string()));
    assert_eq!(ecs.rules[0].description, "Allow access from ALB");
    assert_eq!(ecs.rules[1].ports, PortRange { from: 1024, to: 65535 });
    assert_eq!(ecs.rules[2].protocol, Protocol::All);
    assert_eq!(ecs.rules[2].ports, PortRange::all());
}

#[test]
fn test_unknown_peer_is_error() {
    let kdl = r#"
        security_group "ecs" {
            ingress "somewhere" port=80
        }
    "#;
    let result = parse_kdl_string(kdl, "test".to_string());
    assert!(matches!(result, Err(StackError::UnknownPeer { .. })));
}

#[test]
fn test_malformed_cidr_peer_is_error() {
    let kdl = r#"
        security_group "alb" {
            ingress "not-a-cidr/xyz" port=80
        }
    "#;
    let result = parse_kdl_string(kdl, "test".to_string());
    assert!(matches!(
        result,
        Err(StackError::UnknownPeer { ref peer, .. }) if peer == "not-a-cidr/xyz"
    ));
}

#[test]
fn test_rule_without_port_is_error() {
    let kdl = r#"
        security_group "ecs" {
            ingress "any-ipv4"
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_duplicate_security_group_is_error() {
    let kdl = r#"
        security_group "ecs"
        security_group "ecs"
    "#;
    let result = parse_kdl_string(kdl, "test".to_string());
    assert!(matches!(
        result,
        Err(StackError::DuplicateResource {
            kind: "security_group",
            ..
        })
    ));
}

#[test]
fn test_parse_role() {
    let kdl = r#"
        role "task" {
            assumed_by "ecs-tasks.amazonaws.com"
            managed_policy "service-role/AmazonECSTaskExecutionRolePolicy"
            statement {
                action "secretsmanager:GetSecretValue" "secretsmanager:DescribeSecret"
                resource "arn:aws:secretsmanager:${region}:${account}:secret:*"
            }
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let role = &spec.roles["task"];
    assert_eq!(role.assumed_by, "ecs-tasks.amazonaws.com");
    assert_eq!(role.managed_policies.len(), 1);
    assert_eq!(role.statements[0].actions.len(), 2);
    assert_eq!(role.statements[0].resources.len(), 1);
}

#[test]
fn test_role_requires_principal() {
    let kdl = r#"role "task" { managed_policy "x" }"#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_statement_requires_action() {
    let kdl = r#"
        role "task" {
            assumed_by "ecs-tasks.amazonaws.com"
            statement { resource "*" }
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_secrets() {
    let kdl = r#"
        secret "django" {
            field "username" "admin"
            generate "secretKey" length=50
        }
        secret "app-key" {
            secret_name "products/app-key"
            length 40
            exclude "\"@/\\"
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let django = &spec.secrets["django"];
    assert!(!django.template.is_whole_string());
    assert!(django.template.has_key("username"));
    assert!(django.template.has_key("secretKey"));
    assert_eq!(django.template.generate.as_ref().unwrap().length, 50);

    let app_key = &spec.secrets["app-key"];
    assert!(app_key.template.is_whole_string());
    assert_eq!(app_key.secret_name.as_deref(), Some("products/app-key"));
    assert_eq!(app_key.template.length, Some(40));
    assert_eq!(app_key.template.exclude_characters.as_deref(), Some("\"@/\\"));
}

#[test]
fn test_secret_key_declared_twice_is_error() {
    let kdl = r#"
        secret "django" {
            field "secretKey" "x"
            generate "secretKey"
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_secret_with_fixed_fields_only_is_error() {
    let kdl = r#"
        secret "static" {
            field "username" "admin"
            field "token" "hunter2"
        }
    "#;
    let err = parse_kdl_string(kdl, "test".to_string()).unwrap_err();
    assert!(matches!(err, StackError::InvalidConfig(ref msg) if msg.contains("static")));
}

#[test]
fn test_parse_database_and_proxy() {
    let kdl = r#"
        database "products" {
            engine "postgres" version="15.4"
            instance_class "t3.micro"
            storage initial=20 max=100
            subnets "isolated"
            security_group "db"
            database_name "products"
            credentials username="django"
            removal_policy "snapshot"
            deletion_protection #true
        }
        proxy "products-proxy" {
            target "products"
            security_group "db"
            require_tls #false
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let db = &spec.databases["products"];
    assert_eq!(db.engine, Engine::Postgres("15.4".to_string()));
    assert_eq!(db.instance_class, "t3.micro");
    assert_eq!(db.allocated_storage, 20);
    assert_eq!(db.max_allocated_storage, Some(100));
    assert_eq!(db.subnet_type, SubnetType::Isolated);
    assert_eq!(db.credentials.username, "django");
    assert_eq!(db.removal_policy, Some(RemovalPolicy::Snapshot));
    assert!(db.deletion_protection);
    assert_eq!(db.credential_secret(), "products-credentials");

    let proxy = &spec.proxies["products-proxy"];
    assert_eq!(proxy.target, "products");
    assert!(!proxy.require_tls);
}

#[test]
fn test_storage_max_below_initial_is_error() {
    let kdl = r#"
        database "db" {
            storage initial=50 max=20
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_proxy_requires_target() {
    let kdl = r#"proxy "p" { require_tls #true }"#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_task_definition() {
    let kdl = r#"
        task_definition "django" {
            memory 2048
            cpu 1024
            volume "static"
            task_role {
                bucket "assets"
                statement {
                    action "ssm:GetParameter"
                }
            }
            container "migrate" {
                image "registry:app" tag="v1"
                essential #false
                command "python" "manage.py" "migrate"
            }
            container "django" {
                image "registry:app"
                memory 1024
                port 8000
                env {
                    DATABASE_HOST "endpoint:proxy:products-proxy"
                    AWS_DEFAULT_REGION "${region}"
                    DEBUG "0"
                }
                secrets {
                    DATABASE_PASSWORD "products-credentials" field="password"
                    DJANGO_SECRET_KEY "app-key"
                }
                healthcheck "CMD-SHELL" "curl -f http://localhost:8000/health/ || exit 1" start_period=60
                mount "static" "/app/static"
                depends_on "migrate" condition="success"
                logging "django" retention_days=7
            }
            container "nginx" {
                image "nginx:latest"
                port 80 host=80 protocol="tcp"
                mount "static" "/usr/share/nginx/html/static" read_only=#true
            }
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let task = &spec.task_definitions["django"];
    assert_eq!(task.memory, 2048);
    assert_eq!(task.cpu, 1024);
    assert_eq!(task.volumes, vec!["static".to_string()]);
    assert_eq!(task.bucket_grants, vec!["assets".to_string()]);
    assert_eq!(task.task_role_statements.len(), 1);

    // 宣言順を保持する
    let names: Vec<_> = task.containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["migrate", "django", "nginx"]);

    let migrate = task.container("migrate").unwrap();
    assert_eq!(migrate.essential, Some(false));
    assert_eq!(
        migrate.image,
        Some(ImageRef::Registry {
            registry: "app".to_string(),
            tag: "v1".to_string()
        })
    );

    let django = task.container("django").unwrap();
    assert_eq!(
        django.environment["DATABASE_HOST"],
        EnvValue::Endpoint(EndpointRef::Proxy("products-proxy".to_string()))
    );
    assert_eq!(django.environment["AWS_DEFAULT_REGION"], EnvValue::Region);
    assert_eq!(django.secrets["DATABASE_PASSWORD"].field.as_deref(), Some("password"));
    assert_eq!(django.secrets["DJANGO_SECRET_KEY"].field, None);
    let health = django.health_check.as_ref().unwrap();
    assert_eq!(health.command.len(), 2);
    assert_eq!(health.interval, 30);
    assert_eq!(health.start_period, Some(60));
    assert_eq!(django.depends_on[0].condition, DependencyCondition::Success);
    assert_eq!(django.logging.as_ref().unwrap().retention_days, Some(7));

    let nginx = task.container("nginx").unwrap();
    assert_eq!(nginx.port_mappings[0].host_port, Some(80));
    assert!(nginx.mount_points[0].read_only);
    assert!(task.exposes(80));
}

#[test]
fn test_mount_requires_volume_and_path() {
    let kdl = r#"
        task_definition "web" {
            container "nginx" {
                mount "static"
            }
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_service() {
    let kdl = r#"
        service "django" {
            cluster "main"
            desired_count 2
            subnets "private"
            security_group "ecs"
            health_check_grace_period 60
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let service = &spec.services["django"];
    assert_eq!(service.cluster, "main");
    // タスク定義名はサービス名を引き継ぐ
    assert_eq!(service.task_definition, "django");
    assert_eq!(service.desired_count, 2);
    assert_eq!(service.security_groups, vec!["ecs".to_string()]);
    assert_eq!(service.health_check_grace_period, Some(60));
}

#[test]
fn test_service_requires_cluster() {
    assert!(parse_kdl_string(r#"service "web""#, "test".to_string()).is_err());
}

#[test]
fn test_parse_routing() {
    let kdl = r#"
        load_balancer "web" {
            security_group "alb"
        }
        listener "http" {
            load_balancer "web"
            port 80
            forward "django"
        }
        listener "fallback" {
            load_balancer "web"
            port 8080
            open #false
            fixed_response 404 body="not found"
        }
        target_group "django" {
            service "django"
            container "nginx"
            port 80
            healthcheck "/health/" interval=60 timeout=30 healthy=2 unhealthy=3
            deregistration_delay 30
            stickiness 3600
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let lb = &spec.load_balancers["web"];
    assert!(lb.internet_facing);
    assert_eq!(lb.security_group.as_deref(), Some("alb"));
    assert_eq!(lb.subnet_type, SubnetType::Public);

    let http = &spec.listeners["http"];
    assert!(http.open);
    assert_eq!(
        http.default_action,
        Some(ListenerAction::Forward {
            target_group: "django".to_string()
        })
    );
    let fallback = &spec.listeners["fallback"];
    assert!(!fallback.open);
    assert_eq!(
        fallback.default_action,
        Some(ListenerAction::FixedResponse {
            status_code: 404,
            body: Some("not found".to_string())
        })
    );

    let tg = &spec.target_groups["django"];
    assert_eq!(tg.port, 80);
    assert_eq!(tg.health_check.interval, 60);
    assert_eq!(tg.health_check.unhealthy_threshold, 3);
    assert_eq!(tg.health_check_port(), 80);
    assert_eq!(tg.deregistration_delay, Some(30));
    assert_eq!(tg.stickiness.as_ref().unwrap().duration, 3600);
}

#[test]
fn test_healthcheck_timeout_must_be_shorter_than_interval() {
    let kdl = r#"
        target_group "web" {
            service "web"
            port 80
            healthcheck "/" interval=10 timeout=10
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_target_group_requires_port() {
    let kdl = r#"target_group "web" { service "web" }"#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_distribution_and_web_acl() {
    let kdl = r#"
        distribution "cdn" {
            default origin="bucket:assets"
            behavior "/api/*" origin="lb:web" cache="disabled" methods="all" viewer_protocol="https-only"
        }
        web_acl "edge" {
            scope "regional"
            rate_limit "per-ip" priority=1 limit=2000
            associate "web"
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let cdn = &spec.distributions["cdn"];
    assert_eq!(
        cdn.default_behavior.origin,
        OriginRef::Bucket("assets".to_string())
    );
    assert_eq!(cdn.default_behavior.path_pattern, None);
    assert_eq!(cdn.additional_behaviors.len(), 1);
    assert_eq!(
        cdn.additional_behaviors[0].path_pattern.as_deref(),
        Some("/api/*")
    );

    let acl = &spec.web_acls["edge"];
    assert!(acl.default_allow);
    assert_eq!(acl.rules[0].limit, 2000);
    assert_eq!(acl.rules[0].aggregate_key, AggregateKey::Ip);
    assert_eq!(acl.associations, vec!["web".to_string()]);
}

#[test]
fn test_distribution_requires_default_behavior() {
    let kdl = r#"
        distribution "cdn" {
            behavior "/api/*" origin="lb:web"
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_rate_limit_key_is_normalized() {
    let kdl = r#"
        web_acl "edge" {
            rate_limit "RateLimit" priority=1 limit=100 key="ip"
            rate_limit "Forwarded" priority=2 limit=100 key="forwarded_ip"
        }
    "#;
    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let rules = &spec.web_acls["edge"].rules;
    assert_eq!(rules[0].aggregate_key, AggregateKey::Ip);
    assert_eq!(rules[1].aggregate_key, AggregateKey::ForwardedIp);
}

#[test]
fn test_unknown_rate_limit_key_is_error() {
    let kdl = r#"
        web_acl "edge" {
            rate_limit "RateLimit" priority=1 limit=100 key="cookie"
        }
    "#;
    assert!(matches!(
        parse_kdl_string(kdl, "test".to_string()),
        Err(StackError::InvalidConfig(_))
    ));
}

#[test]
fn test_web_acl_duplicate_priority_is_error() {
    let kdl = r#"
        web_acl "edge" {
            rate_limit "a" priority=1 limit=100
            rate_limit "b" priority=1 limit=200
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_observability() {
    let kdl = r#"
        bucket "logs" {
            removal_policy "destroy"
            auto_delete_objects #true
        }
        log_group "app" {
            retention_days 7
        }
        trail "audit" {
            bucket "logs"
            log_group "app"
        }
        dashboard "ops" {
            dashboard_name "ProductManagementSystem"
            graph "CPU" metric="service-cpu" target="django"
            graph "Connections" metric="db-connections" target="products"
        }
        topic "alerts" {
            display_name "Alerts"
        }
        parameter "/app/feature" "enabled" tier="Standard"
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert!(spec.buckets["logs"].auto_delete_objects);
    assert_eq!(spec.log_groups["app"].retention_days, Some(7));
    assert_eq!(spec.trails["audit"].log_group.as_deref(), Some("app"));
    let dashboard = &spec.dashboards["ops"];
    assert_eq!(dashboard.widgets.len(), 2);
    assert_eq!(
        dashboard.widgets[1].metric,
        MetricRef::DatabaseConnections("products".to_string())
    );
    assert_eq!(spec.topics["alerts"].display_name.as_deref(), Some("Alerts"));
    assert_eq!(spec.parameters["/app/feature"].value, "enabled");
}

#[test]
fn test_unknown_metric_is_error() {
    let kdl = r#"
        dashboard "ops" {
            graph "Disk" metric="disk" target="django"
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_pipeline() {
    let kdl = r#"
        build_project "app-build" {
            registry "app"
            container "DjangoContainer"
            compute "medium"
            env {
                DJANGO_SETTINGS_MODULE "config.settings"
            }
        }
        pipeline "deploy" {
            pipeline_name "AppDeploymentPipeline"
            stage "Source" {
                github "GitHub" owner="me" repo="app" token="github-token" output="source"
            }
            stage "Build" {
                build "BuildDockerImage" project="app-build" input="source" output="build"
            }
            stage "Deploy" {
                ecs_deploy "DeployDjango" service="django" input="build"
            }
        }
    "#;

    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let project = &spec.build_projects["app-build"];
    assert_eq!(project.container, "DjangoContainer");
    assert_eq!(project.environment.len(), 1);
    assert!(project.privileged);

    let pipeline = &spec.pipelines["deploy"];
    assert_eq!(pipeline.stages.len(), 3);
    let source = &pipeline.stages[0].actions[0];
    match &source.kind {
        ActionKind::GithubSource { branch, .. } => assert_eq!(branch, "main"),
        other => panic!("unexpected action: {:?}", other),
    }
    assert_eq!(source.outputs, vec!["source".to_string()]);
    assert_eq!(pipeline.stages[2].actions[0].inputs, vec!["build".to_string()]);
}

#[test]
fn test_unknown_pipeline_action_is_error() {
    let kdl = r#"
        pipeline "deploy" {
            stage "Test" {
                lambda "Run" function="x"
            }
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_instance() {
    let kdl = r#"
        instance "db-admin" {
            instance_type "t3.small"
            image "al2023"
            subnets "private"
            security_group "bastion"
            role "bastion"
        }
        instance "fixed" {
            image "ami-0123456789abcdef0"
        }
    "#;
    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let admin = &spec.instances["db-admin"];
    assert_eq!(admin.instance_type, "t3.small");
    assert_eq!(admin.image, MachineImage::AmazonLinux2023);
    assert_eq!(admin.subnet_type, SubnetType::Private);
    assert_eq!(admin.security_groups, vec!["bastion".to_string()]);
    assert_eq!(admin.role.as_deref(), Some("bastion"));

    let fixed = &spec.instances["fixed"];
    assert_eq!(fixed.instance_type, "t3.micro");
    assert_eq!(
        fixed.image,
        MachineImage::Ami("ami-0123456789abcdef0".to_string())
    );
}

#[test]
fn test_unknown_machine_image_is_error() {
    let kdl = r#"instance "admin" { image "windows-2022" }"#;
    assert!(matches!(
        parse_kdl_string(kdl, "test".to_string()),
        Err(StackError::InvalidConfig(_))
    ));
}

#[test]
fn test_parse_queue() {
    let kdl = r#"
        queue "jobs" {
            visibility_timeout 300
            retention_days 4
        }
        queue "events"
    "#;
    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(spec.queues["jobs"].visibility_timeout, 300);
    assert_eq!(spec.queues["jobs"].retention_period, 345_600);
    assert_eq!(spec.queues["events"].visibility_timeout, 30);
}

#[test]
fn test_queue_retention_out_of_range_is_error() {
    let kdl = r#"queue "jobs" { retention_days 15 }"#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
    let kdl = r#"queue "jobs" { visibility_timeout 50000 }"#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_function() {
    let kdl = r#"
        function "worker" {
            runtime "python3.12"
            handler "main.handler"
            code bucket="artifacts" key="worker.zip"
            memory 256
            timeout 60
            subnets "private"
            env {
                DATABASE_HOST "endpoint:proxy:products-proxy"
                STAGE "prod"
            }
            trigger "jobs" batch_size=5
        }
        function "api" {
            code "exports.handler = async () => ({ statusCode: 200 });"
        }
    "#;
    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let worker = &spec.functions["worker"];
    assert_eq!(worker.runtime, "python3.12");
    assert_eq!(worker.handler, "main.handler");
    assert_eq!(
        worker.code,
        Some(FunctionCode::Bucket {
            bucket: "artifacts".to_string(),
            key: "worker.zip".to_string()
        })
    );
    assert_eq!(worker.memory, 256);
    assert_eq!(worker.subnet_type, Some(SubnetType::Private));
    assert_eq!(
        worker.environment["DATABASE_HOST"],
        EnvValue::Endpoint(EndpointRef::Proxy("products-proxy".to_string()))
    );
    assert_eq!(worker.triggers[0].queue, "jobs");
    assert_eq!(worker.triggers[0].batch_size, 5);

    let api = &spec.functions["api"];
    assert_eq!(api.runtime, "nodejs18.x");
    assert_eq!(api.handler, "index.handler");
    assert_eq!(api.timeout, 3);
    assert!(api.subnet_type.is_none());
    assert!(matches!(api.code, Some(FunctionCode::Inline { .. })));
}

#[test]
fn test_function_without_code_is_error() {
    let kdl = r#"function "api" { handler "index.handler" }"#;
    assert!(matches!(
        parse_kdl_string(kdl, "test".to_string()),
        Err(StackError::InvalidConfig(_))
    ));
    let kdl = r#"function "api" { code bucket="artifacts" }"#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_function_limits_are_checked() {
    let kdl = r#"function "api" { code "x"; timeout 901 }"#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
    let kdl = r#"function "api" { code "x"; memory 64 }"#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_unknown_top_level_node_is_ignored() {
    let kdl = r#"
        variables { region "ap-northeast-1" }
        something_else "x"
        cluster "main"
    "#;
    let spec = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(spec.clusters.len(), 1);
}

#[test]
fn test_invalid_kdl_is_error() {
    let result = parse_kdl_string("service \"unterminated", "test".to_string());
    assert!(matches!(result, Err(StackError::KdlParse(_))));
}

//! Shared fixtures for unit tests

use stackflow_core::{DeployContext, Stack, compose, parse_kdl_string};

pub const PRODUCTS: &str = r#"
stack "products" {
    description "Product management service"
    removal_policy "destroy"
}

network "vpc" {
    cidr "10.0.0.0/16"
    max_azs 2
    nat_gateways 1
    subnet "public" type="public" cidr_mask=24
    subnet "private" type="private" cidr_mask=24
    subnet "data" type="isolated" cidr_mask=24
}

security_group "alb" {
    ingress "any-ipv4" port=80
}
security_group "ecs" {
    ingress "group:alb" port=8000
}
security_group "db" {
    ingress "group:ecs" port=5432
    ingress "group:bastion" port=5432
}
security_group "bastion"

role "bastion" {
    assumed_by "ec2.amazonaws.com"
    managed_policy "AmazonSSMManagedInstanceCore"
    statement {
        action "rds-db:connect"
        resource "arn:aws:rds-db:${region}:${account}:dbuser:*/*"
    }
}

instance "db-admin" {
    security_group "bastion"
    role "bastion"
}

secret "django" {
    generate "secretKey" length=50
}

database "products" {
    engine "postgres" version="15"
    subnets "isolated"
    security_group "db"
    database_name "product_management"
}

proxy "products" {
    target "products"
    security_group "db"
}

registry "app"
cluster "main" {
    container_insights #true
}

bucket "static"
bucket "audit-logs" {
    removal_policy "retain"
}
log_group "/audit/trail" {
    retention_days 90
}

task_definition "django" {
    memory 1024
    cpu 512
    volume "static"
    container "django" {
        image "registry:app"
        port 8000
        env {
            DATABASE_HOST "endpoint:proxy:products"
            AWS_DEFAULT_REGION "${region}"
        }
        secrets {
            DATABASE_PASSWORD "products-credentials" field="password"
            DJANGO_SECRET_KEY "django" field="secretKey"
        }
        mount "static" "/static"
        depends_on "migrate" condition="complete"
    }
    container "migrate" {
        image "registry:app"
        essential #false
        command "python" "manage.py" "migrate"
    }
    task_role {
        bucket "static"
    }
}

service "django" {
    cluster "main"
    security_group "ecs"
}

load_balancer "web" {
    security_group "alb"
}

target_group "django" {
    service "django"
    port 8000
    healthcheck "/health/"
}

listener "http" {
    load_balancer "web"
    port 80
    forward "django"
}

distribution "cdn" {
    default origin="lb:web" cache="disabled" methods="all"
    behavior "/static/*" origin="bucket:static"
}

web_acl "api-waf" {
    scope "regional"
    rate_limit "per-ip" priority=1 limit=2000
    associate "web"
}

trail "audit" {
    bucket "audit-logs"
    log_group "/audit/trail"
}

dashboard "ops" {
    graph "CPU" metric="service-cpu" target="django"
    graph "Requests" metric="lb-requests" target="web"
    graph "Connections" metric="db-connections" target="products"
}

queue "jobs" {
    visibility_timeout 300
    retention_days 4
}

function "worker" {
    code "exports.handler = async (event) => ({ processed: event.Records.length });"
    timeout 60
    subnets "private"
    env {
        DATABASE_HOST "endpoint:proxy:products"
    }
    trigger "jobs" batch_size=5
}

function "api" {
    code "exports.handler = async () => ({ statusCode: 200 });"
}

topic "alerts" {
    display_name "Product alerts"
}

parameter "/app/config/environment" "production"

build_project "app" {
    registry "app"
    container "django"
}

pipeline "release" {
    stage "Source" {
        github "github" owner="example" repo="products" branch="main" token="github-token" output="source"
    }
    stage "Build" {
        build "build" project="app" input="source" output="image"
    }
    stage "Deploy" {
        ecs_deploy "deploy" service="django" input="image"
    }
}
"#;

pub fn ctx() -> DeployContext {
    DeployContext::new("123456789012", "ap-northeast-1")
}

pub fn products_stack() -> Stack {
    let spec = parse_kdl_string(PRODUCTS, "products".to_string()).unwrap();
    compose(&spec, &ctx()).unwrap()
}

use crate::project::{self, TargetArgs};
use colored::Colorize;

pub fn handle(args: &TargetArgs) -> anyhow::Result<()> {
    let loaded = project::load(args)?;
    project::print_target(&loaded);
    let spec = &loaded.spec;
    println!();

    if let Some(network) = &loaded.stack.network {
        println!("{}", "ネットワーク".bold());
        println!("  - {} ({})", network.name.cyan(), network.cidr);
        for subnet in &network.subnets {
            println!("      {} {}", subnet.id, subnet.cidr.dimmed());
        }
    }

    print_names("セキュリティグループ", spec.security_groups.keys());
    print_names("ロール", spec.roles.keys());
    print_names("シークレット", loaded.stack.secrets.iter().map(|s| &s.name));
    print_names("データベース", spec.databases.keys());
    print_names("データベースプロキシ", spec.proxies.keys());
    print_names("コンテナレジストリ", spec.registries.keys());
    print_names("クラスター", spec.clusters.keys());

    if !spec.task_definitions.is_empty() {
        println!("{}", "タスク定義".bold());
        for (name, task) in &spec.task_definitions {
            let containers: Vec<_> = task.containers.iter().map(|c| c.name.as_str()).collect();
            println!("  - {} [{}]", name.cyan(), containers.join(", "));
        }
    }

    print_names("サービス", spec.services.keys());
    print_names("インスタンス", spec.instances.keys());
    print_names("キュー", spec.queues.keys());

    if !loaded.stack.workloads.functions.is_empty() {
        println!("{}", "関数".bold());
        for (name, function) in &loaded.stack.workloads.functions {
            let placement = match function.subnet_type {
                Some(subnet_type) => subnet_type.as_str(),
                None => "outside network",
            };
            println!("  - {} [{}, {}]", name.cyan(), function.runtime, placement.dimmed());
        }
    }

    print_names("ロードバランサー", spec.load_balancers.keys());
    print_names("リスナー", spec.listeners.keys());
    print_names("ターゲットグループ", spec.target_groups.keys());
    print_names("ディストリビューション", spec.distributions.keys());
    print_names("Web ACL", spec.web_acls.keys());
    print_names("バケット", spec.buckets.keys());
    print_names("ロググループ", spec.log_groups.keys());
    print_names("証跡", spec.trails.keys());
    print_names("ダッシュボード", spec.dashboards.keys());
    print_names("トピック", spec.topics.keys());
    print_names("パラメータ", spec.parameters.keys());
    print_names("ビルドプロジェクト", spec.build_projects.keys());
    print_names("パイプライン", spec.pipelines.keys());

    Ok(())
}

fn print_names<'a>(title: &str, names: impl Iterator<Item = &'a String>) {
    let names: Vec<_> = names.collect();
    if names.is_empty() {
        return;
    }
    println!("{} ({})", title.bold(), names.len());
    for name in names {
        println!("  - {}", name.cyan());
    }
}

// tests/balancer_tests.rs
use baton::balancer::{BaseLoadBalancer, LoadBalancer, ZoneAwareLoadBalancer};
use baton::config::{ClientConfig, DynamicConfig};
use baton::predicate::{available_zones, create_snapshot};
use baton::rule::{BestAvailableRule, RoundRobinRule, ZoneAvoidanceRule};
use baton::server::Server;
use baton::source::StaticServerList;
use baton::stats::LoadBalancerStats;
use std::collections::HashMap;
use std::sync::Arc;

fn round_robin_lb(ids: &[&str]) -> Arc<BaseLoadBalancer> {
    let lb = BaseLoadBalancer::builder("it", DynamicConfig::default())
        .rule(Arc::new(RoundRobinRule::new()))
        .build();
    lb.add_servers(ids.iter().map(|id| id.parse().unwrap()).collect());
    lb
}

#[tokio::test]
async fn round_robin_rotation_sequence() {
    let lb = round_robin_lb(&["a:1", "b:1", "c:1"]);
    let mut picks = Vec::new();
    for _ in 0..7 {
        picks.push(lb.choose_server(None).await.unwrap().id().to_string());
    }
    assert_eq!(picks, vec!["a:1", "b:1", "c:1", "a:1", "b:1", "c:1", "a:1"]);
}

#[tokio::test]
async fn round_robin_visits_every_server_fairly() {
    let lb = round_robin_lb(&["a:1", "b:1", "c:1", "d:1"]);
    let requests = 103;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..requests {
        let id = lb.choose_server(None).await.unwrap().id().to_string();
        *counts.entry(id).or_default() += 1;
    }
    for (_, count) in counts {
        assert!(count >= requests / 4);
    }
}

#[tokio::test]
async fn chosen_servers_always_come_from_the_pool() {
    let lb = round_robin_lb(&["a:1", "b:1"]);
    let choosing = {
        let lb = Arc::clone(&lb);
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..500 {
                if let Some(server) = lb.choose_server(None).await {
                    seen.push(server.id().to_string());
                }
                tokio::task::yield_now().await;
            }
            seen
        })
    };
    let adding = {
        let lb = Arc::clone(&lb);
        tokio::spawn(async move {
            for i in 0..50u16 {
                lb.add_servers(vec![Server::new("grown", i)]);
                tokio::task::yield_now().await;
            }
        })
    };
    let seen = choosing.await.unwrap();
    adding.await.unwrap();
    let all: Vec<String> = lb
        .get_all_servers()
        .iter()
        .map(|s| s.id().to_string())
        .collect();
    // the list only ever grows here, so everything seen must be in the
    // final list
    for id in seen {
        assert!(all.contains(&id), "{id} was never in the pool");
    }
}

#[tokio::test]
async fn active_request_counters_survive_concurrent_interleavings() {
    let stats = Arc::new(LoadBalancerStats::new("it", Default::default()));
    let server = Arc::new(Server::new("a", 80));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let stats = Arc::clone(&stats);
        let server = Arc::clone(&server);
        handles.push(tokio::spawn(async move {
            for _ in 0..200 {
                stats.note_request_start(&server);
                tokio::task::yield_now().await;
                stats.note_request_end(&server, 1.0, true);
            }
            // unmatched completions must be no-ops
            stats.note_request_end(&server, 1.0, true);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let count = stats
        .single_server_stat(&server)
        .active_requests_count(std::time::Instant::now());
    assert_eq!(count, 0);
}

#[tokio::test]
async fn best_available_skips_tripped_and_picks_idlest() {
    let lb = BaseLoadBalancer::builder("it", DynamicConfig::default())
        .rule(Arc::new(BestAvailableRule::new()))
        .build();
    lb.add_servers(vec![
        Server::new("a", 1),
        Server::new("b", 1),
        Server::new("c", 1),
    ]);
    let servers = lb.get_all_servers();
    let stats = lb.stats();
    for _ in 0..3 {
        stats.note_request_start(&servers[0]);
    }
    stats.note_request_start(&servers[1]);
    for _ in 0..3 {
        stats.note_connection_failure(&servers[1]);
    }
    for _ in 0..2 {
        stats.note_request_start(&servers[2]);
    }
    let chosen = lb.choose_server(None).await.unwrap();
    assert_eq!(chosen.id(), "c:1");
}

#[tokio::test]
async fn blacked_out_zone_is_excluded_from_the_available_set() {
    let stats = LoadBalancerStats::new("it", Default::default());
    let mut pool = Vec::new();
    for i in 0..10 {
        pool.push(Arc::new(
            Server::new(format!("east{i}"), 80).with_zone("us-east"),
        ));
    }
    let mut west = Vec::new();
    for i in 0..10 {
        let server = Arc::new(Server::new(format!("west{i}"), 80).with_zone("us-west"));
        west.push(Arc::clone(&server));
        pool.push(server);
    }
    stats.update_server_list(&pool);
    stats.note_request_start(&pool[0]);
    for server in &west {
        for _ in 0..3 {
            stats.note_connection_failure(server);
        }
    }
    let snapshot = create_snapshot(&stats);
    let available = available_zones(&snapshot, 0.2, 0.99);
    assert_eq!(available.len(), 1);
    assert!(available.contains("us-east"));
}

#[tokio::test]
async fn zone_aware_balancer_avoids_the_sick_zone() {
    let mut servers = Vec::new();
    for i in 0..5 {
        servers.push(Server::new(format!("east{i}"), 80).with_zone("us-east-1a"));
    }
    for i in 0..5 {
        servers.push(Server::new(format!("west{i}"), 80).with_zone("us-west-2b"));
    }
    let config = DynamicConfig::new(ClientConfig::default());
    let lb = BaseLoadBalancer::builder("it", config.clone())
        .rule(Arc::new(ZoneAvoidanceRule::new(config)))
        .build();
    let source = Arc::new(StaticServerList::new(&servers));
    let balancer = ZoneAwareLoadBalancer::new(lb, source, None);
    balancer.refresh_servers().await.unwrap();

    let stats = balancer.base().stats();
    for server in balancer.get_all_servers().iter() {
        if server.zone() == Some("us-west-2b") {
            for _ in 0..3 {
                stats.note_connection_failure(server);
            }
        }
    }
    for _ in 0..25 {
        let chosen = balancer.choose_server(None).await.unwrap();
        assert_eq!(chosen.zone(), Some("us-east-1a"));
    }
}

#[tokio::test]
async fn mark_server_down_removes_it_until_refresh() {
    let lb = round_robin_lb(&["a:1", "b:1", "c:1"]);
    lb.mark_server_down(&Server::new("b", 1));
    for _ in 0..9 {
        let chosen = lb.choose_server(None).await.unwrap();
        assert_ne!(chosen.id(), "b:1");
    }
    assert_eq!(lb.get_reachable_servers().len(), 2);
    assert_eq!(lb.get_all_servers().len(), 3);
}

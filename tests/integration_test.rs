mod common;

use common::{transition, Rendezvous};
use hermes::batch::Batch;
use hermes::config::{Strategy, TrainingConfig};
use hermes::credit::{discounted_returns, CreditAssignment, Reinforce};
use hermes::error::HermesError;
use hermes::layers::Parameterized;
use hermes::logger::{CsvSummaryWriter, Stat};
use hermes::models::{CommVariant, Ic3Net, ModelSpec, PolicyModel, RetainedGraph, ValueModel};
use hermes::optimizer::{Adam, Optimizer};
use hermes::registry::{ModelRegistry, TrainerKind};
use hermes::trainer::{PgTrainer, QTrainer};
use ndarray::Axis;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn spec(agents: usize, comm_iters: usize, variant: CommVariant) -> ModelSpec {
    ModelSpec {
        agent_num: agents,
        obs_dim: Rendezvous::OBS_DIM,
        hid_dim: 16,
        action_dim: 3,
        comm_iters,
        variant,
        continuous: false,
        init_std: 0.1,
    }
}

fn config(agents: usize) -> TrainingConfig {
    TrainingConfig::new()
        .agent_num(agents)
        .obs_size(Rendezvous::OBS_DIM)
        .action_dim(3)
        .hid_size(16)
        .max_steps(6)
        .batch_size(4)
        .gamma(0.9)
        .replay(false)
        .target(false)
        .grad_clip(false)
}

#[test]
fn test_returns_for_three_agent_batch() {
    let steps = [(1.0, false), (1.0, false), (1.0, false), (0.0, true)];
    let transitions: Vec<_> = steps
        .iter()
        .enumerate()
        .map(|(t, &(r, last))| transition(3, r, t == 0, last))
        .collect();
    let batch = Batch::from_owned(&transitions).unwrap();
    assert_eq!(batch.len(), 4);

    let returns = discounted_returns(batch.reward.view(), batch.last_step.view(), 0.9);
    let expected = [2.71, 1.9, 1.0, 0.0];
    for column in returns.axis_iter(Axis(1)) {
        for (got, want) in column.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-5, "{} vs {}", got, want);
        }
    }

    let net = Ic3Net::new(spec(3, 2, CommVariant::Cooperative)).unwrap();
    let loss = Reinforce::new(0.9).get_loss(&batch, &net, None).unwrap();
    let values = net.value(batch.state.view()).unwrap();
    for t in 0..4 {
        for i in 0..3 {
            let advantage = returns[[t, i]] - values[[t, i]];
            assert!((loss.advantages[[t, i]] - advantage).abs() < 1e-5);
        }
    }
    assert_eq!(loss.action_loss.len(), 3);
    assert_eq!(loss.value_loss.len(), 3);
}

#[test]
fn test_comm_iters_construction_errors() {
    assert!(matches!(
        Ic3Net::new(spec(3, 0, CommVariant::Cooperative)),
        Err(HermesError::CommItersTooLow(0))
    ));
    assert!(matches!(
        Ic3Net::new(spec(3, 1, CommVariant::Cooperative)),
        Err(HermesError::UseIndependentVariant(1))
    ));
    assert!(Ic3Net::new(spec(3, 2, CommVariant::Cooperative)).is_ok());

    assert!(matches!(
        Ic3Net::new(spec(3, 0, CommVariant::Independent)),
        Err(HermesError::CommItersTooLow(0))
    ));
    assert!(matches!(
        Ic3Net::new(spec(3, 3, CommVariant::Independent)),
        Err(HermesError::UseCooperativeVariant(3))
    ));
    assert!(Ic3Net::new(spec(3, 1, CommVariant::Independent)).is_ok());
}

#[test]
fn test_single_agent_update_is_a_plain_step() {
    let cfg = config(1);
    let model = Ic3Net::from_config(&cfg, CommVariant::Cooperative).unwrap();
    let mut reference = model.clone();
    let mut trainer = PgTrainer::new(cfg.clone(), model, Rendezvous::new(1, 6)).unwrap();

    let transitions: Vec<_> = (0..4).map(|t| transition(1, 0.5, t == 0, t == 3)).collect();
    let batch = Batch::from_owned(&transitions).unwrap();
    trainer.action_transition_process(&mut Stat::new(), &batch).unwrap();

    let loss = Reinforce::new(cfg.gamma).get_loss(&batch, &reference, None).unwrap();
    let seed = loss.action_seed(0, cfg.entr);
    reference.action_grads_mut().zero();
    loss.graph.release_action(&seed, reference.action_grads_mut()).unwrap();
    let mut adam = Adam::default(cfg.policy_lrate);
    let (params, grads) = reference.action_group();
    adam.step(params, grads).unwrap();

    let trained = trainer.behaviour_net().policy_net().parameters();
    let expected = reference.policy_net().parameters();
    assert_eq!(trained.len(), expected.len());
    for (a, b) in trained.iter().zip(expected.iter()) {
        assert_eq!(a, b);
    }
}

#[test]
fn test_per_agent_optimizers_see_their_own_gradient() {
    // agent 0 and agent 1 get different rewards, so their snapshots differ
    let cfg = config(2).grad_clip(true);
    let model = Ic3Net::from_config(&cfg, CommVariant::Cooperative).unwrap();
    let snapshot_model = model.clone();
    let mut trainer = PgTrainer::new(cfg.clone(), model, Rendezvous::new(2, 6)).unwrap();

    let mut transitions: Vec<_> = (0..4).map(|t| transition(2, 0.0, t == 0, t == 3)).collect();
    for (t, step) in transitions.iter_mut().enumerate() {
        step.reward[0] = 1.0 + t as f32;
        step.reward[1] = -1.0;
    }
    let batch = Batch::from_owned(&transitions).unwrap();

    let loss = Reinforce::new(cfg.gamma).get_loss(&batch, &snapshot_model, None).unwrap();
    let mut grads = snapshot_model.action_grads().clone();
    let mut norms = Vec::new();
    for i in 0..2 {
        grads.zero();
        loss.graph.backward_action(&loss.action_seed(i, cfg.entr), &mut grads).unwrap();
        grads.clamp(-1.0, 1.0);
        norms.push(grads.norm());
    }

    let mut stat = Stat::new();
    trainer.action_transition_process(&mut stat, &batch).unwrap();
    let expected = (norms[0] + norms[1]) / 2.0;
    let reported = stat.scalar("policy_grad_norm").unwrap();
    assert!((reported - expected).abs() < 1e-4 * expected.max(1.0));
}

/// Two-agent policy update done by hand: agent `order[k]`'s gradient is
/// handed to optimizer `k`.
fn manual_policy_update(model: &mut Ic3Net, adams: &mut [Adam], batch: &Batch, order: [usize; 2], cfg: &TrainingConfig) {
    let loss = Reinforce::new(cfg.gamma).get_loss(batch, &*model, None).unwrap();
    let mut snapshots = Vec::new();
    for i in 0..2 {
        model.action_grads_mut().zero();
        loss.graph.backward_action(&loss.action_seed(i, cfg.entr), model.action_grads_mut()).unwrap();
        snapshots.push(model.action_grads().clone());
    }
    for (adam, &agent) in adams.iter_mut().zip(order.iter()) {
        model.action_grads_mut().assign(&snapshots[agent]).unwrap();
        let (params, grads) = model.action_group();
        adam.step(params, grads).unwrap();
    }
}

fn max_param_gap(a: &Ic3Net, b: &Ic3Net) -> f32 {
    a.policy_net()
        .parameters()
        .iter()
        .zip(b.policy_net().parameters().iter())
        .flat_map(|(x, y)| x.iter().zip(y.iter()).map(|(p, q)| (p - q).abs()).collect::<Vec<_>>())
        .fold(0.0, f32::max)
}

#[test]
fn test_each_optimizer_steps_with_its_own_agents_gradient() {
    let cfg = config(2);
    let model = Ic3Net::from_config(&cfg, CommVariant::Cooperative).unwrap();
    let mut in_order = model.clone();
    let mut swapped = model.clone();
    let mut trainer = PgTrainer::new(cfg.clone(), model, Rendezvous::new(2, 6)).unwrap();

    let batches: Vec<Batch> = [(2.0, -1.0), (-0.5, 1.5)]
        .iter()
        .map(|&(first, second)| {
            let mut steps: Vec<_> = (0..4).map(|t| transition(2, 0.0, t == 0, t == 3)).collect();
            for (t, step) in steps.iter_mut().enumerate() {
                step.reward[0] = first * (t + 1) as f32;
                step.reward[1] = second;
            }
            Batch::from_owned(&steps).unwrap()
        })
        .collect();

    let mut in_order_adams = vec![Adam::default(cfg.policy_lrate), Adam::default(cfg.policy_lrate)];
    let mut swapped_adams = vec![Adam::default(cfg.policy_lrate), Adam::default(cfg.policy_lrate)];
    for batch in &batches {
        trainer.action_transition_process(&mut Stat::new(), batch).unwrap();
        manual_policy_update(&mut in_order, &mut in_order_adams, batch, [0, 1], &cfg);
        manual_policy_update(&mut swapped, &mut swapped_adams, batch, [1, 0], &cfg);
    }

    // a second step exposes each optimizer's moment history
    let trained = trainer.behaviour_net();
    assert!(max_param_gap(trained, &in_order) < 1e-6);
    assert!(max_param_gap(trained, &swapped) > 1e-5);
}

#[test]
fn test_registry_config_and_training_round_trip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    config(3).strategy(Strategy::ActorCritic).train_episodes_num(3).save(&config_path).unwrap();
    let cfg = TrainingConfig::load(&config_path).unwrap();

    let registry = ModelRegistry::with_defaults();
    assert_eq!(registry.trainer_kind("ic3net").unwrap(), TrainerKind::PolicyGradient);
    let model = registry.build("ic3net", &cfg).unwrap().into_ic3net().unwrap();

    let writer = CsvSummaryWriter::new(dir.path(), "ic3net").unwrap();
    let mut trainer = PgTrainer::new(cfg, model, Rendezvous::new(3, 6))
        .unwrap()
        .with_seed(17)
        .with_summary_writer(Box::new(writer));
    let last = trainer.train().unwrap();

    assert_eq!(trainer.episodes(), 3);
    assert_eq!(trainer.steps(), 18);
    assert!(last.scalar("mean_reward").map_or(false, f32::is_finite));
    let scalars = std::fs::read_to_string(dir.path().join("ic3net/scalars.csv")).unwrap();
    assert!(scalars.lines().any(|l| l.starts_with("3,value_loss,")));
}

#[test]
fn test_independent_variant_trains() {
    let cfg = config(2).comm_iters(1);
    let model = ModelRegistry::with_defaults()
        .build("independent_ic3net", &cfg)
        .unwrap()
        .into_ic3net()
        .unwrap();
    let mut trainer = PgTrainer::new(cfg, model, Rendezvous::new(2, 4)).unwrap().with_seed(3);
    let mut stat = Stat::new();
    trainer.run(&mut stat).unwrap();
    assert!(stat.scalar("action_loss").map_or(false, f32::is_finite));
}

#[test]
fn test_continuous_policy_trains() {
    let cfg = config(2).action_dim(1).continuous(true).init_std(0.3);
    let model = Ic3Net::from_config(&cfg, CommVariant::Cooperative).unwrap();
    let mut trainer = PgTrainer::new(cfg, model, Rendezvous::new(2, 4).continuous())
        .unwrap()
        .with_seed(21);
    let mut stat = Stat::new();
    trainer.run(&mut stat).unwrap();
    assert!(stat.scalar("action_loss").map_or(false, f32::is_finite));
    assert!(stat.scalar("entropy").is_none());
    assert!(trainer.behaviour_net().policy_net().log_std.is_some());
}

#[test]
fn test_q_trainer_trains_from_registry() {
    init_tracing();
    let cfg = config(2).behaviour_update_freq(1).train_episodes_num(2).target(true).target_update_freq(3);
    let registry = ModelRegistry::with_defaults();
    assert_eq!(registry.trainer_kind("independent_qnet").unwrap(), TrainerKind::QLearning);
    let model = registry.build("independent_qnet", &cfg).unwrap().into_qnet().unwrap();

    let mut trainer = QTrainer::new(cfg, model, Rendezvous::new(2, 5)).unwrap().with_seed(4);
    let last = trainer.train().unwrap();
    assert_eq!(trainer.episodes(), 2);
    assert_eq!(trainer.steps(), 10);
    assert!(last.scalar("value_loss").map_or(false, f32::is_finite));
}

//! Authoritative server simulation
//!
//! [`Server`] owns the world and runs the server systems once per command
//! frame. Systems run in a fixed order:
//!
//! receiver, input, character-controller, AI, physics, collision,
//! camera-target, rules, animation-tick, cleanup, events, replication.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::collider::Capsule;
use crate::config::SimulationSettings;
use crate::events::{
    CreateEntityEvent, Cursor, DestroyEntityEvent, EventManager, PlayerDisconnectEvent, PlayerJoinEvent, RpcEvent,
};
use crate::input::{Input, InputBuffer};
use crate::math::Vec3;
use crate::net::{
    AckPlayerJoinMessage, CreateEntityMessage, GameStateUpdateMessage, Inbound, MessageBody, MessageTransport,
    PlayerLink,
};
use crate::physics::{integrate, kinematic::apply_grounded, resolve_collisions};
use crate::replication::{capture_entity_states, ReplicationAccumulator, ServerStats};
use crate::store::{entity_bytes, reload_world, world_bytes};
use crate::util::time::{unix_nanos, uptime_secs};
use crate::world::mesh::AVATAR_MESH;
use crate::world::{
    AnimationComponent, CameraComponent, CharacterControllerComponent, ColliderComponent, Entity, EntityId,
    KinematicComponent, MeshComponent, World,
};

use super::behaviour::{drive, follow_targets, tick_animations, wander};
use super::frame::CommandFrameLoop;

/// Sender id used for server-originated messages.
pub const SERVER_SENDER_ID: u32 = 0;

/// One connected player.
#[derive(Debug)]
pub struct PlayerSession {
    pub link: PlayerLink,
    pub joined: bool,
    pub avatar: Option<EntityId>,
    pub camera: Option<EntityId>,
    /// Local command frame of the newest input simulated for this player.
    pub last_input_local_command_frame: Option<u32>,
    /// Set once the reader reported the socket closed.
    pub disconnected: bool,
}

impl PlayerSession {
    fn new(link: PlayerLink) -> Self {
        Self {
            link,
            joined: false,
            avatar: None,
            camera: None,
            last_input_local_command_frame: None,
            disconnected: false,
        }
    }
}

/// Everything the server systems read and write.
pub struct ServerState {
    pub project_name: String,
    pub world: World,
    pub events: EventManager,
    pub inputs: InputBuffer,
    pub players: BTreeMap<u32, PlayerSession>,
    pub settings: SimulationSettings,
    pub world_file: Option<PathBuf>,
    pub rng: ChaCha8Rng,
}

impl ServerState {
    pub fn new(project_name: impl Into<String>, world: World, settings: SimulationSettings) -> Self {
        Self {
            project_name: project_name.into(),
            world,
            events: EventManager::new(),
            inputs: InputBuffer::new(),
            players: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            settings,
            world_file: None,
        }
    }

    /// Remember where the world came from so it can be reloaded at runtime.
    pub fn with_world_file(mut self, path: Option<PathBuf>) -> Self {
        self.world_file = path;
        self
    }

    /// Register a freshly accepted connection. The player enters the world
    /// once it sends `PlayerJoin`.
    pub fn connect(&mut self, link: PlayerLink) {
        let player_id = link.player_id;
        if self.players.contains_key(&player_id) {
            warn!(player_id, "Duplicate connection ignored");
            return;
        }
        self.players.insert(player_id, PlayerSession::new(link));
        debug!(player_id, "Player connected");
    }

    pub fn command_frame(&self) -> u32 {
        self.world.command_frame_count()
    }

    pub fn connected_players(&self) -> usize {
        self.players.len()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connected_players: self.players.len(),
            entity_count: self.world.len(),
            uptime_secs: uptime_secs(),
        }
    }

    fn message(&self, body: MessageBody) -> MessageTransport {
        MessageTransport::new(SERVER_SENDER_ID, self.command_frame(), unix_nanos(), body)
    }

    fn send_to(&self, player_id: u32, body: MessageBody) {
        let message = self.message(body);
        if let Some(session) = self.players.get(&player_id) {
            if !session.link.send(message) {
                debug!(player_id, "Writer gone, message dropped");
            }
        }
    }

    fn spawn_position(&mut self) -> Vec3 {
        self.world
            .first_spawn_point()
            .and_then(|id| self.world.world_position(id))
            .unwrap_or(Vec3::ZERO)
    }
}

/// Server systems, in pipeline order.
#[derive(Debug, Clone)]
pub enum ServerSystem {
    Receiver,
    Input,
    CharacterController,
    Ai,
    Physics,
    Collision,
    CameraTarget,
    Rules { rpc: Cursor },
    AnimationTick,
    Cleanup,
    Events { joins: Cursor, disconnects: Cursor },
    Replication { cadence: ReplicationAccumulator, destroyed: Cursor },
}

impl ServerSystem {
    pub fn pipeline(settings: &SimulationSettings) -> Vec<ServerSystem> {
        vec![
            Self::Receiver,
            Self::Input,
            Self::CharacterController,
            Self::Ai,
            Self::Physics,
            Self::Collision,
            Self::CameraTarget,
            Self::Rules { rpc: Cursor::new() },
            Self::AnimationTick,
            Self::Cleanup,
            Self::Events {
                joins: Cursor::new(),
                disconnects: Cursor::new(),
            },
            Self::Replication {
                cadence: ReplicationAccumulator::new(settings.ms_per_game_state_update),
                destroyed: Cursor::new(),
            },
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::Input => "input",
            Self::CharacterController => "character-controller",
            Self::Ai => "ai",
            Self::Physics => "physics",
            Self::Collision => "collision",
            Self::CameraTarget => "camera-target",
            Self::Rules { .. } => "rules",
            Self::AnimationTick => "animation-tick",
            Self::Cleanup => "cleanup",
            Self::Events { .. } => "events",
            Self::Replication { .. } => "replication",
        }
    }

    pub fn update(&mut self, dt_ms: f64, state: &mut ServerState) {
        match self {
            Self::Receiver => receive(state),
            Self::Input => pull_inputs(state),
            Self::CharacterController => drive_players(state),
            Self::Ai => {
                let agents: Vec<EntityId> = state
                    .world
                    .iter()
                    .filter(|e| !e.is_static && e.kinematic.is_some() && e.ai.is_some())
                    .map(|e| e.id)
                    .collect();
                for id in agents {
                    wander(&mut state.world, id, &mut state.rng);
                }
            }
            Self::Physics => {
                let dt = dt_ms / 1000.0;
                for id in movers(&state.world).collect::<Vec<_>>() {
                    if integrate(&mut state.world, id, dt, &state.settings.physics) {
                        state.world.index_entity(id);
                    }
                }
            }
            Self::Collision => {
                let report = resolve_collisions(&mut state.world, &state.settings.physics);
                for id in movers(&state.world).collect::<Vec<_>>() {
                    apply_grounded(&mut state.world, id, report.grounded.contains(&id));
                }
            }
            Self::CameraTarget => follow_targets(&mut state.world),
            Self::Rules { rpc } => apply_rules(state, rpc),
            Self::AnimationTick => tick_animations(&mut state.world, dt_ms),
            Self::Cleanup => cleanup(state),
            Self::Events { joins, disconnects } => {
                let joining: Vec<u32> = state.events.player_join.read(joins).iter().map(|e| e.player_id).collect();
                for player_id in joining {
                    handle_join(state, player_id);
                }
                let leaving: Vec<u32> = state
                    .events
                    .player_disconnect
                    .read(disconnects)
                    .iter()
                    .map(|e| e.player_id)
                    .collect();
                for player_id in leaving {
                    handle_disconnect(state, player_id);
                }
            }
            Self::Replication { cadence, destroyed } => {
                if cadence.should_send(dt_ms) {
                    replicate(state, destroyed);
                }
            }
        }
    }
}

/// Non-static kinematic entities.
fn movers(world: &World) -> impl Iterator<Item = EntityId> + '_ {
    world
        .iter()
        .filter(|e| !e.is_static && e.kinematic.is_some())
        .map(|e| e.id)
}

fn receive(state: &mut ServerState) {
    let ids: Vec<u32> = state.players.keys().copied().collect();
    for player_id in ids {
        loop {
            let Some(session) = state.players.get_mut(&player_id) else {
                break;
            };
            if session.disconnected {
                break;
            }
            let inbound = match session.link.inbound.try_recv() {
                Ok(inbound) => inbound,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => Inbound::Disconnected,
            };
            match inbound {
                Inbound::Disconnected => {
                    session.disconnected = true;
                    state
                        .events
                        .player_disconnect
                        .push(PlayerDisconnectEvent { player_id });
                    info!(player_id, "Player connection closed");
                    break;
                }
                Inbound::Message(message) => handle_message(state, player_id, message),
            }
        }
    }
}

fn handle_message(state: &mut ServerState, player_id: u32, message: MessageTransport) {
    match message.body {
        MessageBody::PlayerJoin => state.events.player_join.push(PlayerJoinEvent { player_id }),
        MessageBody::PlayerInput(body) => {
            if let Err(e) = state.inputs.push(player_id, message.command_frame, body.input) {
                debug!(player_id, error = %e, "Input dropped");
            }
        }
        MessageBody::Ping(ping) => state.send_to(player_id, MessageBody::Ping(ping)),
        MessageBody::Rpc(rpc) => state.events.rpc.push(RpcEvent {
            player_id,
            command: rpc.command,
        }),
        other => {
            warn!(player_id, message_type = ?other.message_type(), "Unexpected message from client");
        }
    }
}

fn pull_inputs(state: &mut ServerState) {
    let ServerState {
        players, inputs, world, ..
    } = state;
    for (player_id, session) in players.iter_mut() {
        let Some(camera) = session.camera.filter(|_| session.joined) else {
            continue;
        };
        let pulled = inputs.pull(*player_id);
        if !pulled.stale {
            session.last_input_local_command_frame = Some(pulled.local_command_frame);
        }
        if let Some(tag) = world.get_mut(camera).and_then(|e| e.player_input.as_mut()) {
            tag.input = pulled.input;
            tag.stale = pulled.stale;
        }
    }
}

fn drive_players(state: &mut ServerState) {
    let driven: Vec<(EntityId, Input)> = state
        .world
        .iter()
        .filter_map(|e| {
            let tag = e.player_input.as_ref()?;
            let target = e.camera.as_ref()?.target?;
            Some((target, tag.input.clone()))
        })
        .collect();
    for (target, input) in driven {
        drive(&mut state.world, target, &input);
    }
}

fn respawn(world: &mut World, id: EntityId, at: Vec3) {
    world.set_local_position(id, at);
    if let Some(kin) = world.get_mut(id).and_then(|e| e.kinematic.as_mut()) {
        kin.velocity = Vec3::ZERO;
        kin.accumulated_velocity = Vec3::ZERO;
        kin.grounded = false;
        kin.jump = false;
    }
    world.index_entity(id);
}

fn apply_rules(state: &mut ServerState, rpc: &mut Cursor) {
    let spawn = state.spawn_position();

    let kill_plane_y = state.settings.kill_plane_y;
    for id in movers(&state.world).collect::<Vec<_>>() {
        if state.world.world_position(id).is_some_and(|p| p.y < kill_plane_y) {
            info!(entity_id = id, "Entity fell below kill plane, respawning");
            respawn(&mut state.world, id, spawn);
        }
    }

    let commands: Vec<RpcEvent> = state.events.rpc.read(rpc).to_vec();
    for RpcEvent { player_id, command } in commands {
        match command.trim() {
            "respawn" => {
                let avatar = state.players.get(&player_id).and_then(|s| s.avatar);
                match avatar {
                    Some(id) => respawn(&mut state.world, id, spawn),
                    None => debug!(player_id, "Respawn requested without an avatar"),
                }
            }
            "reload_world" => reload(state),
            other => warn!(player_id, command = other, "Unknown RPC command"),
        }
    }
}

/// Reload the world file. Joined players are re-joined into the new world;
/// on failure the current world stays.
fn reload(state: &mut ServerState) {
    let Some(path) = state.world_file.clone() else {
        warn!("World reload requested but no world file is configured");
        return;
    };
    if reload_world(&mut state.world, &path).is_err() {
        return;
    }
    info!(path = %path.display(), "World reloaded");
    for (player_id, session) in state.players.iter_mut() {
        if session.joined {
            session.joined = false;
            session.avatar = None;
            session.camera = None;
            state.events.player_join.push(PlayerJoinEvent { player_id: *player_id });
        }
    }
}

fn cleanup(state: &mut ServerState) {
    state.world.clear_frame_contacts();
    let dead: Vec<EntityId> = state.world.iter().filter(|e| e.deadge).map(|e| e.id).collect();
    for id in dead {
        if state.world.delete_entity(id).is_some() {
            state.events.destroy_entity.push(DestroyEntityEvent { entity_id: id });
        }
    }
}

fn handle_join(state: &mut ServerState, player_id: u32) {
    match state.players.get(&player_id) {
        Some(session) if session.joined => {
            warn!(player_id, "Player already joined");
            return;
        }
        Some(_) => {}
        None => {
            debug!(player_id, "Join from a player that already left");
            return;
        }
    }

    let spawn = state.spawn_position();
    let avatar_settings = state.settings.avatar.clone();
    let avatar = Entity::new(format!("player-{player_id}"))
        .with_position(spawn)
        .with_mesh(MeshComponent::new(AVATAR_MESH))
        .with_collider(ColliderComponent::capsule(Capsule::upright(
            avatar_settings.radius,
            avatar_settings.length,
        )))
        .with_kinematic(KinematicComponent::with_gravity(avatar_settings.speed))
        .with_character_controller(CharacterControllerComponent {
            control_vector: Vec3::ZERO,
            speed: avatar_settings.speed,
            fly_speed: avatar_settings.fly_speed,
        })
        .with_animation(AnimationComponent {
            handle: AVATAR_MESH.to_string(),
            ..Default::default()
        });
    let avatar_id = match state.world.spawn(avatar) {
        Ok(id) => id,
        Err(e) => {
            error!(player_id, error = %e, "Failed to spawn avatar");
            return;
        }
    };
    let camera = Entity::new(format!("camera-{player_id}"))
        .with_position(spawn + avatar_settings.camera_offset)
        .with_camera(CameraComponent {
            target_offset: avatar_settings.camera_offset,
            target: Some(avatar_id),
        })
        .with_player_input(player_id);
    let camera_id = match state.world.spawn(camera) {
        Ok(id) => id,
        Err(e) => {
            error!(player_id, error = %e, "Failed to spawn camera");
            state.world.delete_entity(avatar_id);
            return;
        }
    };

    if let Some(session) = state.players.get_mut(&player_id) {
        session.joined = true;
        session.avatar = Some(avatar_id);
        session.camera = Some(camera_id);
    }

    match world_bytes(&state.world) {
        Ok(serialized_world) => state.send_to(
            player_id,
            MessageBody::AckPlayerJoin(AckPlayerJoinMessage {
                project_name: state.project_name.clone(),
                player_id,
                player_entity_id: avatar_id,
                camera_entity_id: camera_id,
                serialized_world,
            }),
        ),
        Err(e) => error!(player_id, error = %e, "Failed to serialize world for join"),
    }

    for entity_id in [avatar_id, camera_id] {
        state.events.create_entity.push(CreateEntityEvent { entity_id });
        let Some(entity) = state.world.get(entity_id) else {
            continue;
        };
        let bytes = match entity_bytes(entity) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(entity_id, error = %e, "Failed to serialize entity");
                continue;
            }
        };
        let message = state.message(MessageBody::CreateEntity(CreateEntityMessage {
            owner_id: player_id,
            entity_bytes: bytes,
        }));
        for (other_id, other) in &state.players {
            if *other_id != player_id && other.joined {
                other.link.send(message.clone());
            }
        }
    }

    info!(
        player_id,
        avatar = avatar_id,
        camera = camera_id,
        players = state.players.len(),
        "Player joined"
    );
}

fn handle_disconnect(state: &mut ServerState, player_id: u32) {
    let Some(session) = state.players.remove(&player_id) else {
        return;
    };
    state.inputs.remove_player(player_id);
    for entity_id in [session.camera, session.avatar].into_iter().flatten() {
        if state.world.delete_entity(entity_id).is_some() {
            state.events.destroy_entity.push(DestroyEntityEvent { entity_id });
        }
    }
    info!(player_id, players = state.players.len(), "Player left");
}

fn replicate(state: &mut ServerState, destroyed: &mut Cursor) {
    let destroyed_entities: Vec<EntityId> = state
        .events
        .destroy_entity
        .read(destroyed)
        .iter()
        .map(|e| e.entity_id)
        .collect();
    let entity_states = capture_entity_states(&mut state.world);
    let stats = state.stats();
    let frame = state.command_frame();

    for (player_id, session) in &state.players {
        if !session.joined {
            continue;
        }
        let update = GameStateUpdateMessage {
            entity_states: entity_states.clone(),
            destroyed_entities: destroyed_entities.clone(),
            global_command_frame: frame,
            server_stats: stats.clone(),
            last_input_command_frame: session.last_input_local_command_frame,
        };
        let message = MessageTransport::new(SERVER_SENDER_ID, frame, unix_nanos(), MessageBody::GameStateUpdate(update));
        if !session.link.send(message) {
            debug!(player_id, "Writer gone, snapshot dropped");
        }
    }
}

/// The server frame loop.
pub struct Server {
    pub state: ServerState,
    systems: Vec<ServerSystem>,
    frame_loop: CommandFrameLoop,
}

impl Server {
    pub fn new(state: ServerState) -> Self {
        let systems = ServerSystem::pipeline(&state.settings);
        let frame_loop = CommandFrameLoop::new(
            state.settings.ms_per_command_frame,
            state.settings.max_command_frames_per_loop,
        );
        Self {
            state,
            systems,
            frame_loop,
        }
    }

    pub fn system_names(&self) -> Vec<&'static str> {
        self.systems.iter().map(ServerSystem::name).collect()
    }

    /// Run one command frame.
    pub fn run_frame(&mut self) {
        let dt_ms = self.frame_loop.step_ms();
        for system in &mut self.systems {
            system.update(dt_ms, &mut self.state);
        }
        self.state.world.increment_command_frame();
    }

    /// Feed wall-clock time; runs as many frames as it covers.
    pub fn tick(&mut self, delta_ms: f64) -> u32 {
        let Self {
            state,
            systems,
            frame_loop,
        } = self;
        let dt_ms = frame_loop.step_ms();
        frame_loop.advance(delta_ms, || {
            for system in systems.iter_mut() {
                system.update(dt_ms, state);
            }
            state.world.increment_command_frame();
        })
    }
}

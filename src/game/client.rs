//! Predicting client simulation
//!
//! The client simulates its own avatar ahead of the server using local
//! input, records each frame in a prediction history and reconciles when a
//! snapshot acknowledges one of its inputs. Every other entity is moved by
//! interpolating between snapshots.

use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::config::SimulationSettings;
use crate::input::{Input, InputSource};
use crate::net::{GameStateUpdateMessage, Inbound, InputMessage, MessageBody, MessageTransport, PingMessage, PlayerLink};
use crate::physics::{integrate, kinematic::apply_grounded, resolve_single};
use crate::replication::{apply_frame, entity_state, PredictionError, PredictionHistory, StateBuffer};
use crate::store::{entity_from_bytes, world_from_bytes};
use crate::util::time::unix_nanos;
use crate::world::{EntityId, World};

use super::behaviour::{drive, follow_targets, tick_animations};
use super::frame::CommandFrameLoop;

/// Everything the client systems read and write.
pub struct ClientState {
    pub link: PlayerLink,
    pub world: World,
    pub settings: SimulationSettings,
    pub player_id: Option<u32>,
    pub project_name: Option<String>,
    pub avatar: Option<EntityId>,
    pub camera: Option<EntityId>,
    /// Next local command frame; inputs are stamped with it.
    pub local_command_frame: u32,
    pub state_buffer: StateBuffer,
    pub history: PredictionHistory,
    pub input_source: Box<dyn InputSource>,
    pub current_input: Input,
    pub last_rtt_ms: Option<f64>,
    pub disconnected: bool,
}

impl ClientState {
    pub fn new(link: PlayerLink, world: World, settings: SimulationSettings, input_source: Box<dyn InputSource>) -> Self {
        Self {
            link,
            world,
            player_id: None,
            project_name: None,
            avatar: None,
            camera: None,
            local_command_frame: 1,
            state_buffer: StateBuffer::new(settings.max_state_buffer_size),
            history: PredictionHistory::new(settings.max_command_frame_buffer_size),
            input_source,
            current_input: Input::default(),
            last_rtt_ms: None,
            disconnected: false,
            settings,
        }
    }

    pub fn joined(&self) -> bool {
        self.avatar.is_some()
    }

    fn send(&self, command_frame: u32, body: MessageBody) {
        let sender_id = self.player_id.unwrap_or_default();
        if !self
            .link
            .send(MessageTransport::new(sender_id, command_frame, unix_nanos(), body))
        {
            debug!("Writer gone, message dropped");
        }
    }
}

/// Client systems, in pipeline order.
#[derive(Debug, Clone)]
pub enum ClientSystem {
    Receiver,
    Input,
    CharacterController,
    Kinematic,
    Collision,
    CameraTarget,
    AnimationTick,
    Cleanup,
    Ping { since_ms: f64 },
    PostFrame,
}

impl ClientSystem {
    pub fn pipeline() -> Vec<ClientSystem> {
        vec![
            Self::Receiver,
            Self::Input,
            Self::CharacterController,
            Self::Kinematic,
            Self::Collision,
            Self::CameraTarget,
            Self::AnimationTick,
            Self::Cleanup,
            Self::Ping { since_ms: 0.0 },
            Self::PostFrame,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::Input => "input",
            Self::CharacterController => "character-controller",
            Self::Kinematic => "kinematic",
            Self::Collision => "collision",
            Self::CameraTarget => "camera-target",
            Self::AnimationTick => "animation-tick",
            Self::Cleanup => "cleanup",
            Self::Ping { .. } => "ping",
            Self::PostFrame => "post-frame",
        }
    }

    pub fn update(&mut self, dt_ms: f64, state: &mut ClientState) {
        match self {
            Self::Receiver => {
                receive(state, dt_ms);
                interpolate(state);
            }
            Self::Input => {
                if !state.joined() {
                    return;
                }
                let input = state.input_source.sample(state.local_command_frame);
                state.send(
                    state.local_command_frame,
                    MessageBody::PlayerInput(InputMessage { input: input.clone() }),
                );
                if let Some(tag) = state
                    .camera
                    .and_then(|id| state.world.get_mut(id))
                    .and_then(|e| e.player_input.as_mut())
                {
                    tag.input = input.clone();
                    tag.stale = false;
                }
                state.current_input = input;
            }
            Self::CharacterController => {
                if let Some(avatar) = state.avatar {
                    drive(&mut state.world, avatar, &state.current_input);
                }
            }
            Self::Kinematic => {
                if let Some(avatar) = state.avatar {
                    integrate(&mut state.world, avatar, dt_ms / 1000.0, &state.settings.physics);
                }
            }
            Self::Collision => {
                if let Some(avatar) = state.avatar {
                    let report = resolve_single(&mut state.world, avatar);
                    apply_grounded(&mut state.world, avatar, report.grounded);
                    state.world.index_entity(avatar);
                }
            }
            Self::CameraTarget => follow_targets(&mut state.world),
            Self::AnimationTick => tick_animations(&mut state.world, dt_ms),
            Self::Cleanup => {
                state.world.clear_frame_contacts();
                let dead: Vec<EntityId> = state.world.iter().filter(|e| e.deadge).map(|e| e.id).collect();
                for id in dead {
                    state.world.delete_entity(id);
                }
            }
            Self::Ping { since_ms } => {
                *since_ms += dt_ms;
                if state.player_id.is_some() && *since_ms >= state.settings.ping_interval_ms {
                    *since_ms = 0.0;
                    state.send(
                        state.local_command_frame,
                        MessageBody::Ping(PingMessage {
                            unix_time_ns: unix_nanos(),
                        }),
                    );
                }
            }
            Self::PostFrame => {
                if let Some(avatar) = state.avatar {
                    if let Some(post) = entity_state(&mut state.world, avatar) {
                        state
                            .history
                            .record(state.local_command_frame, state.current_input.clone(), post);
                    }
                    state.local_command_frame += 1;
                }
                state.world.increment_command_frame();
            }
        }
    }
}

fn receive(state: &mut ClientState, dt_ms: f64) {
    loop {
        if state.disconnected {
            return;
        }
        let message = match state.link.inbound.try_recv() {
            Ok(Inbound::Message(message)) => message,
            Ok(Inbound::Disconnected) | Err(TryRecvError::Disconnected) => {
                warn!("Connection to server closed");
                state.disconnected = true;
                return;
            }
            Err(TryRecvError::Empty) => return,
        };
        match message.body {
            MessageBody::AcceptConnection(accept) => {
                info!(player_id = accept.player_id, "Connection accepted, joining");
                state.player_id = Some(accept.player_id);
                state.send(0, MessageBody::PlayerJoin);
            }
            MessageBody::AckPlayerJoin(ack) => match world_from_bytes(&ack.serialized_world, &state.world) {
                Ok(world) => {
                    info!(
                        project = %ack.project_name,
                        avatar = ack.player_entity_id,
                        entities = world.len(),
                        "Joined world"
                    );
                    state.world = world;
                    state.player_id = Some(ack.player_id);
                    state.avatar = Some(ack.player_entity_id);
                    state.camera = Some(ack.camera_entity_id);
                    state.project_name = Some(ack.project_name);
                }
                Err(e) => error!(error = %e, "Failed to load world from server"),
            },
            MessageBody::CreateEntity(create) => match entity_from_bytes(&create.entity_bytes) {
                Ok(entity) if state.world.contains(entity.id) => {
                    debug!(entity_id = entity.id, "Entity already present");
                }
                Ok(entity) => {
                    if let Err(e) = state.world.insert(entity) {
                        warn!(error = %e, "Failed to insert replicated entity");
                    }
                }
                Err(e) => warn!(error = %e, "Malformed entity from server"),
            },
            MessageBody::GameStateUpdate(update) => {
                reconcile(state, &update, dt_ms);
                state.state_buffer.push(update);
            }
            MessageBody::Ping(ping) => {
                let rtt_ms = unix_nanos().saturating_sub(ping.unix_time_ns).max(0) as f64 / 1e6;
                debug!(rtt_ms, "Ping");
                state.last_rtt_ms = Some(rtt_ms);
            }
            other => warn!(message_type = ?other.message_type(), "Unexpected message from server"),
        }
    }
}

fn reconcile(state: &mut ClientState, update: &GameStateUpdateMessage, dt_ms: f64) {
    let (Some(avatar), Some(ack)) = (state.avatar, update.last_input_command_frame) else {
        return;
    };
    let Some(server) = update.entity_states.iter().find(|s| s.id == avatar) else {
        return;
    };
    match state
        .history
        .reconcile(&mut state.world, avatar, server, ack, dt_ms, &state.settings.physics)
    {
        Ok(_) => {}
        Err(PredictionError::UnknownFrame(frame)) => debug!(frame, "Acknowledged frame not in history"),
        Err(e) => warn!(error = %e, "Reconciliation failed"),
    }
}

/// Apply one interpolation frame per client frame, and catch up when the
/// buffer grows beyond the interpolation delay.
fn interpolate(state: &mut ClientState) {
    let delay = state.settings.interpolation_delay_frames;
    let mut pulled = 0;
    while let Some(frame) = state.state_buffer.pull() {
        apply_frame(&mut state.world, &frame, state.avatar);
        pulled += 1;
        if state.state_buffer.len() <= delay {
            break;
        }
    }
    if pulled > 1 {
        debug!(frames = pulled, "Caught up on interpolation frames");
    }
}

/// The client frame loop.
pub struct Client {
    pub state: ClientState,
    systems: Vec<ClientSystem>,
    frame_loop: CommandFrameLoop,
}

impl Client {
    pub fn new(state: ClientState) -> Self {
        let frame_loop = CommandFrameLoop::new(
            state.settings.ms_per_command_frame,
            state.settings.max_command_frames_per_loop,
        );
        Self {
            state,
            systems: ClientSystem::pipeline(),
            frame_loop,
        }
    }

    pub fn system_names(&self) -> Vec<&'static str> {
        self.systems.iter().map(ClientSystem::name).collect()
    }

    pub fn run_frame(&mut self) {
        let dt_ms = self.frame_loop.step_ms();
        for system in &mut self.systems {
            system.update(dt_ms, &mut self.state);
        }
    }

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
        })
    }
}

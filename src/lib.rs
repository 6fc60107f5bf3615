//! Browser client for a block-board game server.
//!
//! A WebSocket feeds JSON board updates into a local mirror of the game
//! board, and a fixed-rate timer repaints a 2D canvas whenever that mirror
//! changed since the last frame.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    CanvasRenderingContext2d, CloseEvent, ErrorEvent, HtmlCanvasElement, MessageEvent, MouseEvent,
    WebSocket,
};

// --- IMPORTS & LOGGING ---
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

// --- NETWORK PROTOCOL ---

pub type EntityId = u64;

/// Command code of the remove-entity player action.
pub const PLAYER_CMD_REMOVE_ENTITY: u8 = 0;
const UPDATE_STATUS_REMOVE: u8 = 0;
const UPDATE_STATUS_ADD: u8 = 1;
const ENTITY_KIND_BLOCK: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Alpha as a single decimal digit 0..=9, meaning tenths.
    pub alpha_tenths: u8,
}

impl Color {
    /// Canvas fill style string. The alpha digit is appended after "0.",
    /// so 7 renders as 0.7.
    pub fn css(&self) -> String {
        format!("rgba({},{},{},0.{})", self.r, self.g, self.b, self.alpha_tenths)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Block { geometry: Rect, color: Color },
}

/// Full entity payload, carried by add updates.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerInfo {
    #[serde(rename = "N")]
    pub name: String,
    #[serde(rename = "S")]
    pub score: i64,
}

impl PlayerInfo {
    fn score_line(&self) -> String {
        format!("{}: {}", self.name, self.score)
    }
}

/// One normalized entity update, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityUpdate {
    Add(EntitySnapshot),
    Remove(EntityId),
}

/// A decoded board update. Entity updates apply in order; a present player
/// list replaces the roster wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardUpdate {
    pub entities: Vec<EntityUpdate>,
    pub players: Option<Vec<PlayerInfo>>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognized message shape: {0}")]
    UnrecognizedMessage(#[from] serde_json::Error),
    #[error("unknown update status {status} for entity {id}")]
    UnknownStatus { id: EntityId, status: u8 },
    #[error("unknown kind tag {kind} for entity {id}")]
    UnknownKind { id: EntityId, kind: u8 },
    #[error("add update for entity {id} is missing field {field}")]
    MissingField { id: EntityId, field: &'static str },
    #[error("alpha channel {alpha} of entity {id} is not a single digit")]
    AlphaOutOfRange { id: EntityId, alpha: u8 },
}

// Two wire versions exist. The older one nests the entity under "E" and
// spells the id "ID"; the newer one flattens the entity record, spells the
// id "Id" and may carry a player roster. Both decode to `BoardUpdate`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireMessage {
    V2(GameUpdateWire),
    V1(BoardUpdateWire),
}

#[derive(Deserialize)]
struct GameUpdateWire {
    #[serde(rename = "GU")]
    _marker: bool,
    #[serde(rename = "Es", default)]
    entities: Vec<EntityRecordWire>,
    #[serde(rename = "Ps")]
    players: Option<Vec<PlayerInfo>>,
}

#[derive(Deserialize)]
struct EntityRecordWire {
    #[serde(rename = "S")]
    status: u8,
    #[serde(rename = "Id")]
    id: EntityId,
    #[serde(flatten)]
    body: EntityBodyWire,
}

#[derive(Deserialize)]
struct BoardUpdateWire {
    #[serde(rename = "BU")]
    updates: Vec<UpdateRecordV1Wire>,
}

#[derive(Deserialize)]
struct UpdateRecordV1Wire {
    #[serde(rename = "T")]
    status: u8,
    #[serde(rename = "E")]
    entity: EntityRecordV1Wire,
}

#[derive(Deserialize)]
struct EntityRecordV1Wire {
    #[serde(rename = "ID")]
    id: EntityId,
    #[serde(flatten)]
    body: EntityBodyWire,
}

// Kind payload fields. All optional on the wire: remove records carry only
// the entity id.
#[derive(Deserialize)]
struct EntityBodyWire {
    #[serde(rename = "T")]
    kind: Option<u8>,
    #[serde(rename = "X")]
    x: Option<f64>,
    #[serde(rename = "Y")]
    y: Option<f64>,
    #[serde(rename = "W")]
    w: Option<f64>,
    #[serde(rename = "H")]
    h: Option<f64>,
    #[serde(rename = "R")]
    r: Option<u8>,
    #[serde(rename = "G")]
    g: Option<u8>,
    #[serde(rename = "B")]
    b: Option<u8>,
    #[serde(rename = "A")]
    a: Option<u8>,
}

impl EntityBodyWire {
    fn into_snapshot(self, id: EntityId) -> Result<EntitySnapshot, DecodeError> {
        let missing = |field: &'static str| DecodeError::MissingField { id, field };
        let kind = self.kind.ok_or_else(|| missing("T"))?;
        match kind {
            ENTITY_KIND_BLOCK => {
                let geometry = Rect {
                    x: self.x.ok_or_else(|| missing("X"))?,
                    y: self.y.ok_or_else(|| missing("Y"))?,
                    w: self.w.ok_or_else(|| missing("W"))?,
                    h: self.h.ok_or_else(|| missing("H"))?,
                };
                let alpha = self.a.ok_or_else(|| missing("A"))?;
                if alpha > 9 {
                    return Err(DecodeError::AlphaOutOfRange { id, alpha });
                }
                let color = Color {
                    r: self.r.ok_or_else(|| missing("R"))?,
                    g: self.g.ok_or_else(|| missing("G"))?,
                    b: self.b.ok_or_else(|| missing("B"))?,
                    alpha_tenths: alpha,
                };
                Ok(EntitySnapshot {
                    id,
                    kind: EntityKind::Block { geometry, color },
                })
            }
            other => Err(DecodeError::UnknownKind { id, kind: other }),
        }
    }
}

fn normalize_update(
    status: u8,
    id: EntityId,
    body: EntityBodyWire,
) -> Result<EntityUpdate, DecodeError> {
    match status {
        UPDATE_STATUS_ADD => Ok(EntityUpdate::Add(body.into_snapshot(id)?)),
        UPDATE_STATUS_REMOVE => Ok(EntityUpdate::Remove(id)),
        other => Err(DecodeError::UnknownStatus { id, status: other }),
    }
}

/// Decodes one inbound message, accepting either wire version.
pub fn decode_board_message(raw: &str) -> Result<BoardUpdate, DecodeError> {
    match serde_json::from_str::<WireMessage>(raw)? {
        WireMessage::V2(msg) => {
            let mut entities = Vec::with_capacity(msg.entities.len());
            for record in msg.entities {
                entities.push(normalize_update(record.status, record.id, record.body)?);
            }
            Ok(BoardUpdate {
                entities,
                players: msg.players,
            })
        }
        WireMessage::V1(msg) => {
            let mut entities = Vec::with_capacity(msg.updates.len());
            for record in msg.updates {
                entities.push(normalize_update(
                    record.status,
                    record.entity.id,
                    record.entity.body,
                )?);
            }
            Ok(BoardUpdate {
                entities,
                players: None,
            })
        }
    }
}

/// Outbound player command, `{"Act":{"G":{"C":code,"E":id}}}` on the wire.
#[derive(Debug, Serialize)]
pub struct PlayerAction {
    #[serde(rename = "Act")]
    act: ActionWire,
}

#[derive(Debug, Serialize)]
struct ActionWire {
    #[serde(rename = "G")]
    game: GameActionWire,
}

#[derive(Debug, Serialize)]
struct GameActionWire {
    #[serde(rename = "C")]
    command: u8,
    #[serde(rename = "E")]
    entity_id: EntityId,
}

impl PlayerAction {
    pub fn remove_entity(id: EntityId) -> PlayerAction {
        PlayerAction {
            act: ActionWire {
                game: GameActionWire {
                    command: PLAYER_CMD_REMOVE_ENTITY,
                    entity_id: id,
                },
            },
        }
    }
}

// --- BOARD STATE ---

/// Local mirror of the server's board. `changed` is true exactly when the
/// entity map or roster moved since the last consumed draw.
#[derive(Debug, Default)]
pub struct BoardState {
    entities: HashMap<EntityId, EntityKind>,
    players: Vec<PlayerInfo>,
    changed: bool,
}

impl BoardState {
    pub fn add_entity(&mut self, snapshot: EntitySnapshot) {
        self.entities.insert(snapshot.id, snapshot.kind);
        self.changed = true;
    }

    /// Removing an id that is not tracked is a no-op and leaves the board
    /// clean.
    pub fn remove_entity(&mut self, id: EntityId) {
        if self.entities.remove(&id).is_some() {
            self.changed = true;
        }
    }

    pub fn set_players(&mut self, players: Vec<PlayerInfo>) {
        self.players = players;
        self.changed = true;
    }

    pub fn apply(&mut self, update: BoardUpdate) {
        for entity in update.entities {
            match entity {
                EntityUpdate::Add(snapshot) => self.add_entity(snapshot),
                EntityUpdate::Remove(id) => self.remove_entity(id),
            }
        }
        if let Some(players) = update.players {
            self.set_players(players);
        }
    }

    /// Consumes the dirty flag. An update landing between two draws marks
    /// it again, so nothing is lost by clearing before painting.
    fn take_changed(&mut self) -> bool {
        std::mem::replace(&mut self.changed, false)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// First tracked block whose rectangle contains the point. Overlapping
    /// blocks resolve in map iteration order.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<EntityId> {
        self.entities.iter().find_map(|(id, kind)| {
            let EntityKind::Block { geometry, .. } = kind;
            geometry.contains(x, y).then_some(*id)
        })
    }
}

// --- RENDERER ---

const FRAMES_PER_SECOND: u32 = 10;
const SCORE_LINE_X: f64 = 10.0;
const SCORE_LINE_HEIGHT: f64 = 20.0;
const SCORE_TEXT_FILL: &str = "rgb(0,0,0)";

fn score_line_y(slot: usize) -> f64 {
    SCORE_LINE_HEIGHT * (slot as f64 + 1.0)
}

/// Owns the canvas, the 2D context and the repaint timer.
pub struct Renderer {
    canvas: HtmlCanvasElement,
    ctx: Option<CanvasRenderingContext2d>,
    timer: Option<i32>,
    board: BoardState,
}

impl Renderer {
    pub fn new(canvas: HtmlCanvasElement) -> Renderer {
        Renderer {
            canvas,
            ctx: None,
            timer: None,
            board: BoardState::default(),
        }
    }

    /// Acquires the 2D context. False means the runtime cannot draw.
    pub fn init(&mut self) -> bool {
        match self.canvas.get_context("2d") {
            Ok(Some(obj)) => match obj.dyn_into::<CanvasRenderingContext2d>() {
                Ok(ctx) => {
                    self.ctx = Some(ctx);
                    true
                }
                Err(_) => false,
            },
            _ => false,
        }
    }

    pub fn add_entity(&mut self, snapshot: EntitySnapshot) {
        self.board.add_entity(snapshot);
    }

    pub fn remove_entity(&mut self, id: EntityId) {
        self.board.remove_entity(id);
    }

    pub fn set_players(&mut self, players: Vec<PlayerInfo>) {
        self.board.set_players(players);
    }

    pub fn apply(&mut self, update: BoardUpdate) {
        self.board.apply(update);
    }

    pub fn hit_test(&self, x: f64, y: f64) -> Option<EntityId> {
        self.board.hit_test(x, y)
    }

    /// Arms the repaint timer at a fixed period of 1000 / fps milliseconds.
    pub fn start(renderer: &Rc<RefCell<Renderer>>, fps: u32) -> Result<(), JsValue> {
        let tick = {
            let renderer = renderer.clone();
            Closure::wrap(Box::new(move || {
                renderer.borrow_mut().draw();
            }) as Box<dyn FnMut()>)
        };
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let handle = window.set_interval_with_callback_and_timeout_and_arguments_0(
            tick.as_ref().unchecked_ref(),
            (1000 / fps) as i32,
        )?;
        tick.forget();
        renderer.borrow_mut().timer = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.timer.take() {
            if let Some(window) = web_sys::window() {
                window.clear_interval_with_handle(handle);
            }
        }
    }

    /// Repaints if anything changed since the last draw, otherwise does
    /// nothing.
    pub fn draw(&mut self) {
        if !self.board.take_changed() {
            return;
        }
        let Some(ctx) = &self.ctx else { return };

        ctx.clear_rect(
            0.0,
            0.0,
            self.canvas.width() as f64,
            self.canvas.height() as f64,
        );
        for kind in self.board.entities.values() {
            let EntityKind::Block { geometry, color } = kind;
            ctx.set_fill_style_str(&color.css());
            ctx.fill_rect(geometry.x, geometry.y, geometry.w, geometry.h);
        }
        ctx.set_fill_style_str(SCORE_TEXT_FILL);
        for (slot, player) in self.board.players.iter().enumerate() {
            ctx.fill_text(&player.score_line(), SCORE_LINE_X, score_line_y(slot))
                .ok();
        }
    }
}

// --- CONNECTION ---

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection is not open")]
    NotConnected,
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport rejected the send: {0}")]
    Transport(String),
}

/// Wraps the WebSocket. The handle drops to `None` when the transport
/// reports closure; sends after that fail instead of faulting.
pub struct Connection {
    socket: Option<WebSocket>,
}

impl Connection {
    pub fn new() -> Connection {
        Connection { socket: None }
    }

    /// Opens the socket and registers the async callbacks. Returns false
    /// when the runtime has no WebSocket support or the socket cannot be
    /// constructed; the actual connection outcome arrives via the
    /// callbacks.
    pub fn open(
        conn: &Rc<RefCell<Connection>>,
        renderer: &Rc<RefCell<Renderer>>,
        url: &str,
    ) -> bool {
        let Some(window) = web_sys::window() else {
            return false;
        };
        let has_sockets = js_sys::Reflect::has(window.as_ref(), &JsValue::from_str("WebSocket"))
            .unwrap_or(false);
        if !has_sockets {
            return false;
        }
        let ws = match WebSocket::new(url) {
            Ok(ws) => ws,
            Err(_) => return false,
        };

        {
            let onopen = Closure::wrap(Box::new(move || {
                log("connection open");
            }) as Box<dyn FnMut()>);
            ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
            onopen.forget();
        }

        {
            let renderer = renderer.clone();
            let onmessage = Closure::wrap(Box::new(move |e: MessageEvent| {
                let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() else {
                    return;
                };
                let raw: String = txt.into();
                match decode_board_message(&raw) {
                    Ok(update) => renderer.borrow_mut().apply(update),
                    Err(err) => log(&format!("dropping message: {err}")),
                }
            }) as Box<dyn FnMut(MessageEvent)>);
            ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
            onmessage.forget();
        }

        {
            let onerror = Closure::wrap(Box::new(move |e: ErrorEvent| {
                log(&format!("connection error: {}", e.message()));
            }) as Box<dyn FnMut(ErrorEvent)>);
            ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
            onerror.forget();
        }

        {
            let conn = conn.clone();
            let onclose = Closure::wrap(Box::new(move |e: CloseEvent| {
                log(&format!(
                    "connection closed: code {} reason {:?}",
                    e.code(),
                    e.reason()
                ));
                conn.borrow_mut().socket = None;
            }) as Box<dyn FnMut(CloseEvent)>);
            ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
            onclose.forget();
        }

        conn.borrow_mut().socket = Some(ws);
        true
    }

    pub fn send(&self, action: &PlayerAction) -> Result<(), SendError> {
        let ws = self.socket.as_ref().ok_or(SendError::NotConnected)?;
        let payload = serde_json::to_string(action)?;
        ws.send_with_str(&payload)
            .map_err(|err| SendError::Transport(format!("{err:?}")))
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn close(&mut self) {
        if let Some(ws) = self.socket.take() {
            ws.close().ok();
        }
    }
}

impl Default for Connection {
    fn default() -> Connection {
        Connection::new()
    }
}

// --- APP ---

/// Startup bundle handed over from the page script.
#[wasm_bindgen]
pub struct AppConfig {
    canvas: HtmlCanvasElement,
    ws_url: String,
    no_canvas: js_sys::Function,
    no_web_sockets: js_sys::Function,
}

#[wasm_bindgen]
impl AppConfig {
    #[wasm_bindgen(constructor)]
    pub fn new(
        canvas: HtmlCanvasElement,
        ws_url: String,
        no_canvas: js_sys::Function,
        no_web_sockets: js_sys::Function,
    ) -> AppConfig {
        AppConfig {
            canvas,
            ws_url,
            no_canvas,
            no_web_sockets,
        }
    }
}

/// A running client session. Dropping the handle leaves the session
/// running; call `shutdown` to stop the timer and close the socket.
#[wasm_bindgen]
pub struct App {
    renderer: Rc<RefCell<Renderer>>,
    connection: Rc<RefCell<Connection>>,
}

#[wasm_bindgen]
impl App {
    pub fn shutdown(&self) {
        self.renderer.borrow_mut().stop();
        self.connection.borrow_mut().close();
    }
}

/// Wires the session together. Returns `None` after invoking the matching
/// capability callback when canvas or WebSocket support is missing.
#[wasm_bindgen]
pub fn run_app(config: AppConfig) -> Result<Option<App>, JsValue> {
    console_error_panic_hook::set_once();

    let renderer = Rc::new(RefCell::new(Renderer::new(config.canvas.clone())));
    if !renderer.borrow_mut().init() {
        config.no_canvas.call0(&JsValue::NULL)?;
        return Ok(None);
    }

    let connection = Rc::new(RefCell::new(Connection::new()));
    if !Connection::open(&connection, &renderer, &config.ws_url) {
        config.no_web_sockets.call0(&JsValue::NULL)?;
        return Ok(None);
    }

    Renderer::start(&renderer, FRAMES_PER_SECOND)?;

    {
        let renderer = renderer.clone();
        let connection = connection.clone();
        let onclick = Closure::wrap(Box::new(move |event: MouseEvent| {
            let hit = renderer
                .borrow()
                .hit_test(event.offset_x() as f64, event.offset_y() as f64);
            let Some(id) = hit else { return };
            if let Err(err) = connection.borrow().send(&PlayerAction::remove_entity(id)) {
                log(&format!("remove command for entity {id} dropped: {err}"));
            }
        }) as Box<dyn FnMut(MouseEvent)>);
        config
            .canvas
            .add_event_listener_with_callback("click", onclick.as_ref().unchecked_ref())?;
        onclick.forget();
    }

    Ok(Some(App {
        renderer,
        connection,
    }))
}

// --- TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: EntityId, x: f64, y: f64, w: f64, h: f64) -> EntitySnapshot {
        EntitySnapshot {
            id,
            kind: EntityKind::Block {
                geometry: Rect { x, y, w, h },
                color: Color {
                    r: 10,
                    g: 20,
                    b: 30,
                    alpha_tenths: 7,
                },
            },
        }
    }

    #[test]
    fn decodes_v2_add_with_roster() {
        let raw = r#"{"GU":true,
            "Es":[{"S":1,"Id":5,"T":0,"X":1,"Y":2,"W":3,"H":4,"R":10,"G":20,"B":30,"A":7}],
            "Ps":[{"N":"Ann","S":3},{"N":"Bo","S":9}]}"#;
        let update = decode_board_message(raw).unwrap();
        assert_eq!(
            update.entities,
            vec![EntityUpdate::Add(block(5, 1.0, 2.0, 3.0, 4.0))]
        );
        let players = update.players.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "Ann");
        assert_eq!(players[0].score, 3);
        assert_eq!(players[1].name, "Bo");
        assert_eq!(players[1].score, 9);
    }

    #[test]
    fn decodes_v2_remove_carrying_only_the_id() {
        let update = decode_board_message(r#"{"GU":true,"Es":[{"S":0,"Id":5}]}"#).unwrap();
        assert_eq!(update.entities, vec![EntityUpdate::Remove(5)]);
        assert!(update.players.is_none());
    }

    #[test]
    fn decodes_v2_roster_only_message() {
        let update = decode_board_message(r#"{"GU":true,"Ps":[{"N":"Ann","S":1}]}"#).unwrap();
        assert!(update.entities.is_empty());
        assert_eq!(update.players.unwrap()[0].name, "Ann");
    }

    #[test]
    fn decodes_v1_add_and_remove() {
        let raw = r#"{"BU":[
            {"T":1,"E":{"ID":5,"T":0,"X":1,"Y":2,"W":3,"H":4,"R":10,"G":20,"B":30,"A":7}},
            {"T":0,"E":{"ID":9}}]}"#;
        let update = decode_board_message(raw).unwrap();
        assert_eq!(
            update.entities,
            vec![
                EntityUpdate::Add(block(5, 1.0, 2.0, 3.0, 4.0)),
                EntityUpdate::Remove(9),
            ]
        );
        assert!(update.players.is_none());
    }

    #[test]
    fn rejects_unknown_shapes_statuses_and_kinds() {
        assert!(matches!(
            decode_board_message(r#"{"hello":1}"#),
            Err(DecodeError::UnrecognizedMessage(_))
        ));
        assert!(matches!(
            decode_board_message(r#"{"GU":true,"Es":[{"S":2,"Id":1}]}"#),
            Err(DecodeError::UnknownStatus { id: 1, status: 2 })
        ));
        assert!(matches!(
            decode_board_message(
                r#"{"GU":true,"Es":[{"S":1,"Id":1,"T":9,"X":0,"Y":0,"W":1,"H":1,"R":0,"G":0,"B":0,"A":1}]}"#
            ),
            Err(DecodeError::UnknownKind { id: 1, kind: 9 })
        ));
    }

    #[test]
    fn rejects_adds_with_missing_payload_fields() {
        let err = decode_board_message(
            r#"{"GU":true,"Es":[{"S":1,"Id":3,"T":0,"Y":2,"W":3,"H":4,"R":1,"G":2,"B":3,"A":4}]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingField { id: 3, field: "X" }
        ));
    }

    #[test]
    fn rejects_multi_digit_alpha() {
        let err = decode_board_message(
            r#"{"GU":true,"Es":[{"S":1,"Id":3,"T":0,"X":1,"Y":2,"W":3,"H":4,"R":1,"G":2,"B":3,"A":12}]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::AlphaOutOfRange { id: 3, alpha: 12 }
        ));
    }

    #[test]
    fn replaying_adds_and_removes_matches_set_semantics() {
        let mut board = BoardState::default();
        board.add_entity(block(1, 0.0, 0.0, 1.0, 1.0));
        board.add_entity(block(2, 0.0, 0.0, 1.0, 1.0));
        board.remove_entity(1);
        board.remove_entity(42); // absent, no-op
        board.add_entity(block(3, 0.0, 0.0, 1.0, 1.0));
        let mut ids: Vec<EntityId> = board.entities.keys().copied().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn add_then_remove_in_one_update_leaves_nothing() {
        let mut board = BoardState::default();
        board.apply(BoardUpdate {
            entities: vec![
                EntityUpdate::Add(block(7, 0.0, 0.0, 1.0, 1.0)),
                EntityUpdate::Remove(7),
            ],
            players: None,
        });
        assert_eq!(board.entity_count(), 0);
    }

    #[test]
    fn dirty_flag_is_consumed_once_per_change() {
        let mut board = BoardState::default();
        assert!(!board.take_changed());

        board.add_entity(block(1, 0.0, 0.0, 1.0, 1.0));
        assert!(board.take_changed());
        // further ticks with no mutation stay clean
        assert!(!board.take_changed());
        assert!(!board.take_changed());

        board.remove_entity(1);
        assert!(board.take_changed());
    }

    #[test]
    fn removing_an_absent_entity_does_not_dirty_the_board() {
        let mut board = BoardState::default();
        board.remove_entity(5);
        assert!(!board.take_changed());
    }

    #[test]
    fn roster_replacement_is_wholesale_and_dirties_the_board() {
        let mut board = BoardState::default();
        board.set_players(vec![PlayerInfo {
            name: "Ann".into(),
            score: 3,
        }]);
        assert!(board.take_changed());

        board.set_players(vec![PlayerInfo {
            name: "Bo".into(),
            score: 9,
        }]);
        assert!(board.take_changed());
        assert_eq!(board.players.len(), 1);
        assert_eq!(board.players[0].name, "Bo");
    }

    #[test]
    fn block_color_renders_with_tenths_alpha() {
        let color = Color {
            r: 10,
            g: 20,
            b: 30,
            alpha_tenths: 7,
        };
        assert_eq!(color.css(), "rgba(10,20,30,0.7)");
    }

    #[test]
    fn score_lines_stack_at_twenty_pixel_slots() {
        let ann = PlayerInfo {
            name: "Ann".into(),
            score: 3,
        };
        let bo = PlayerInfo {
            name: "Bo".into(),
            score: 9,
        };
        assert_eq!(ann.score_line(), "Ann: 3");
        assert_eq!(bo.score_line(), "Bo: 9");
        assert_eq!(score_line_y(0), 20.0);
        assert_eq!(score_line_y(1), 40.0);
    }

    #[test]
    fn hit_test_finds_the_block_under_the_pointer() {
        let mut board = BoardState::default();
        board.add_entity(block(5, 1.0, 2.0, 3.0, 4.0));
        assert_eq!(board.hit_test(2.0, 3.0), Some(5));
        assert_eq!(board.hit_test(1.0, 2.0), Some(5)); // top-left edge inclusive
        assert_eq!(board.hit_test(4.0, 6.0), None); // bottom-right edge exclusive
        assert_eq!(board.hit_test(50.0, 50.0), None);
    }

    #[test]
    fn remove_command_serializes_to_the_action_envelope() {
        let payload = serde_json::to_string(&PlayerAction::remove_entity(9)).unwrap();
        assert_eq!(payload, r#"{"Act":{"G":{"C":0,"E":9}}}"#);
    }

    #[test]
    fn send_on_a_released_connection_is_guarded() {
        let conn = Connection::new();
        assert!(!conn.is_open());
        assert!(matches!(
            conn.send(&PlayerAction::remove_entity(1)),
            Err(SendError::NotConnected)
        ));
    }
}

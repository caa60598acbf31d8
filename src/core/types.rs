//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};

/// Index of a unit in the fixed-capacity unit pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u8);

impl UnitId {
    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u8::MAX as usize);
        Self(index as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Simulation time in milliseconds
pub type Millis = u32;

/// The three factions on a battle map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Team {
    Player = 0,
    Civilian = 1,
    Hostile = 2,
}

impl Team {
    pub const ALL: [Team; 3] = [Team::Player, Team::Civilian, Team::Hostile];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Player and Hostile are enemies of each other. Civilians are nobody's
    /// target and target nobody.
    pub fn is_hostile_to(self, other: Team) -> bool {
        matches!(
            (self, other),
            (Team::Player, Team::Hostile) | (Team::Hostile, Team::Player)
        )
    }

    /// The team that reacts while this team is moving
    pub fn opponent(self) -> Team {
        match self {
            Team::Hostile => Team::Player,
            _ => Team::Hostile,
        }
    }
}

/// A cell on the battle grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn step(self, dir: Direction) -> Self {
        let (dx, dy) = dir.delta();
        self.offset(dx, dy)
    }

    pub fn distance_squared(self, other: Self) -> i32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance(self, other: Self) -> f32 {
        (self.distance_squared(other) as f32).sqrt()
    }

    /// Is `other` one of the 8 neighbors with a diagonal offset?
    pub fn is_diagonal_to(self, other: Self) -> bool {
        (self.x - other.x).abs() == 1 && (self.y - other.y).abs() == 1
    }

    /// Center of the tile in world coordinates (ground plane)
    pub fn center(self) -> glam::Vec2 {
        glam::Vec2::new(self.x as f32 + 0.5, self.y as f32 + 0.5)
    }
}

/// Cardinal directions, indexed to match the bit order of a `DirMask`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// North is +y
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::East => (1, 0),
            Direction::South => (0, -1),
            Direction::West => (-1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        Self::ALL[(self as usize + 2) & 3]
    }

    /// The next direction clockwise
    pub fn clockwise(self) -> Direction {
        Self::ALL[(self as usize + 1) & 3]
    }

    pub fn from_delta(dx: i32, dy: i32) -> Option<Direction> {
        match (dx, dy) {
            (0, 1) => Some(Direction::North),
            (1, 0) => Some(Direction::East),
            (0, -1) => Some(Direction::South),
            (-1, 0) => Some(Direction::West),
            _ => None,
        }
    }
}

/// Heading in degrees for a unit step. 0 faces +y, 90 faces +x.
pub fn delta_to_rotation(dx: i32, dy: i32) -> f32 {
    debug_assert!(dx != 0 || dy != 0);
    match (dx.signum(), dy.signum()) {
        (1, 1) => 45.0,
        (1, 0) => 90.0,
        (1, -1) => 135.0,
        (0, -1) => 180.0,
        (-1, -1) => 225.0,
        (-1, 0) => 270.0,
        (-1, 1) => 315.0,
        _ => 0.0,
    }
}

/// Heading in degrees toward an arbitrary grid-plane vector
pub fn vector_to_rotation(v: glam::Vec2) -> f32 {
    normalize_degrees(v.x.atan2(v.y).to_degrees())
}

/// Normalize an angle into [0, 360)
pub fn normalize_degrees(angle: f32) -> f32 {
    let a = angle % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Shortest signed rotation from `from` to `to`, in degrees within (-180, 180]
pub fn min_delta_degrees(from: f32, to: f32) -> f32 {
    let mut delta = normalize_degrees(to) - normalize_degrees(from);
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta <= -180.0 {
        delta += 360.0;
    }
    delta
}

/// Unit facing vector for a heading in degrees (x, y on the grid)
pub fn facing_vector(degrees: f32) -> glam::Vec2 {
    let r = degrees.to_radians();
    glam::Vec2::new(r.sin(), r.cos())
}

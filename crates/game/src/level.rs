//! Scripted level direction: timed enemy waves plus scroll/camera events.
//! Scripts are code-defined; asset pipelines stay outside the core.

use crate::net::messages::{CameraBounds, LevelEventData, LevelInit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnOrder {
    pub render_type: u16,
    pub x: f32,
    pub y: f32,
    pub health: i32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub score_value: i32,
}

#[derive(Debug, Clone)]
pub struct Wave {
    /// Seconds from level start.
    pub at: f32,
    pub spawns: Vec<SpawnOrder>,
}

#[derive(Debug, Clone)]
pub struct LevelScript {
    pub level_id: u16,
    pub scroll_speed: f32,
    pub bounds: CameraBounds,
    pub waves: Vec<Wave>,
    pub events: Vec<(f32, LevelEventData)>,
    /// Seconds until the level reports complete once all waves are out.
    pub duration: f32,
}

impl LevelScript {
    /// The shipped first mission: three escalating waves over one minute.
    pub fn first_mission() -> Self {
        let bounds = CameraBounds {
            min_x: 0.0,
            max_x: 1920.0,
            min_y: 0.0,
            max_y: 1080.0,
        };

        let grunt = |y: f32| SpawnOrder {
            render_type: 8,
            x: 2000.0,
            y,
            health: 2,
            vel_x: -120.0,
            vel_y: 0.0,
            score_value: 100,
        };
        let charger = |y: f32| SpawnOrder {
            render_type: 9,
            x: 2000.0,
            y,
            health: 1,
            vel_x: -260.0,
            vel_y: 0.0,
            score_value: 150,
        };
        let bruiser = SpawnOrder {
            render_type: 10,
            x: 2000.0,
            y: 540.0,
            health: 12,
            vel_x: -60.0,
            vel_y: 0.0,
            score_value: 1000,
        };

        Self {
            level_id: 1,
            scroll_speed: 60.0,
            bounds,
            waves: vec![
                Wave {
                    at: 3.0,
                    spawns: vec![grunt(200.0), grunt(400.0), grunt(600.0)],
                },
                Wave {
                    at: 12.0,
                    spawns: vec![charger(300.0), charger(700.0)],
                },
                Wave {
                    at: 22.0,
                    spawns: vec![grunt(150.0), grunt(500.0), grunt(850.0), charger(540.0)],
                },
                Wave {
                    at: 40.0,
                    spawns: vec![bruiser],
                },
            ],
            events: vec![
                (20.0, LevelEventData::SetScroll { speed: 90.0 }),
                (38.0, LevelEventData::SetMusic { music_id: 2 }),
                (40.0, LevelEventData::SetScroll { speed: 0.0 }),
            ],
            duration: 60.0,
        }
    }
}

/// Walks the script clock, releasing waves and events as their timestamps
/// pass. The instance turns spawn orders into entities.
#[derive(Debug)]
pub struct LevelDirector {
    script: LevelScript,
    elapsed: f32,
    next_wave: usize,
    next_event: usize,
}

impl LevelDirector {
    pub fn new(script: LevelScript) -> Self {
        Self {
            script,
            elapsed: 0.0,
            next_wave: 0,
            next_event: 0,
        }
    }

    pub fn init_message(&self) -> LevelInit {
        LevelInit {
            level_id: self.script.level_id,
            scroll_speed: self.script.scroll_speed,
            bounds: self.script.bounds,
        }
    }

    pub fn bounds(&self) -> CameraBounds {
        self.script.bounds
    }

    pub fn update(&mut self, dt: f32) -> Vec<SpawnOrder> {
        self.elapsed += dt;
        let mut due = Vec::new();
        while self
            .script
            .waves
            .get(self.next_wave)
            .is_some_and(|wave| wave.at <= self.elapsed)
        {
            due.extend(self.script.waves[self.next_wave].spawns.iter().copied());
            self.next_wave += 1;
        }
        due
    }

    /// Script events whose timestamps have passed; each is released once.
    pub fn consume_events(&mut self) -> Vec<LevelEventData> {
        let mut events = Vec::new();
        while self
            .script
            .events
            .get(self.next_event)
            .is_some_and(|(at, _)| *at <= self.elapsed)
        {
            events.push(self.script.events[self.next_event].1);
            self.next_event += 1;
        }
        events
    }

    pub fn is_complete(&self) -> bool {
        self.next_wave >= self.script.waves.len() && self.elapsed >= self.script.duration
    }

    pub fn reset(&mut self) {
        self.elapsed = 0.0;
        self.next_wave = 0;
        self.next_event = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waves_release_in_order() {
        let mut director = LevelDirector::new(LevelScript::first_mission());

        assert!(director.update(1.0).is_empty());
        let first = director.update(2.5);
        assert_eq!(first.len(), 3);

        // Nothing re-releases.
        assert!(director.update(0.1).is_empty());
    }

    #[test]
    fn events_release_once() {
        let mut director = LevelDirector::new(LevelScript::first_mission());
        director.update(21.0);
        let events = director.consume_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], LevelEventData::SetScroll { .. }));
        assert!(director.consume_events().is_empty());
    }

    #[test]
    fn completion_requires_duration_and_waves() {
        let mut director = LevelDirector::new(LevelScript::first_mission());
        director.update(45.0);
        assert!(!director.is_complete());
        director.update(20.0);
        assert!(director.is_complete());

        director.reset();
        assert!(!director.is_complete());
    }
}

//! Event catalogue and hook call sites.
//!
//! Each domain has its own event enum; the numeric ids are the ones scripts
//! pass to `Register*Event`. The submodules hold the host-facing hook
//! functions, all built on the generic guard-and-dispatch helpers.

pub mod creature;
pub mod gossip;
pub mod item;
pub mod player;
pub mod server;

pub use gossip::GossipTarget;

use std::fmt::Debug;
use std::hash::Hash;

/// Registry families, in the order scripts historically number them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterType {
    Packet = 0,
    Server,
    Player,
    Guild,
    Group,
    Creature,
    CreatureUnique,
    Vehicle,
    CreatureGossip,
    GameObject,
    GameObjectGossip,
    Spell,
    Item,
    ItemGossip,
    PlayerGossip,
    Bg,
    Map,
    Instance,
}

impl RegisterType {
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Noun used in "Couldn't find a X with (ID: N)!".
    pub fn entry_kind(self) -> &'static str {
        match self {
            Self::Creature | Self::CreatureGossip | Self::CreatureUnique => "creature",
            Self::GameObject | Self::GameObjectGossip => "gameobject",
            Self::Item | Self::ItemGossip => "item",
            Self::Packet => "opcode",
            Self::Spell => "spell",
            Self::Map | Self::Instance => "map",
            _ => "entry",
        }
    }
}

/// An event enum usable as part of a binding key.
pub trait HookEvent: Copy + Eq + Ord + Hash + Debug + Send + Sync + 'static {
    const CATEGORY: &'static str;

    fn from_id(id: u32) -> Option<Self>;
    fn id(self) -> u32;
    fn name(self) -> &'static str;
}

macro_rules! hook_events {
    ($(#[$meta:meta])* $name:ident ($category:literal) { $($variant:ident = $id:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum $name {
            $($variant = $id,)*
        }

        impl HookEvent for $name {
            const CATEGORY: &'static str = $category;

            fn from_id(id: u32) -> Option<Self> {
                match id {
                    $($id => Some(Self::$variant),)*
                    _ => None,
                }
            }

            fn id(self) -> u32 {
                self as u32
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                }
            }
        }
    };
}

hook_events! {
    /// Keyed by packet opcode.
    PacketEvents ("PacketEvents") {
        OnPacketReceive = 5,
        OnPacketReceiveUnknown = 6,
        OnPacketSend = 7,
    }
}

hook_events! {
    ServerEvents ("ServerEvents") {
        OnNetworkStart = 1,
        OnNetworkStop = 2,
        OnSocketOpen = 3,
        OnSocketClose = 4,
        OnPacketReceive = 5,
        OnPacketReceiveUnknown = 6,
        OnPacketSend = 7,
        WorldOnOpenStateChange = 8,
        WorldOnConfigLoad = 9,
        WorldOnShutdownInit = 11,
        WorldOnShutdownCancel = 12,
        WorldOnUpdate = 13,
        WorldOnStartup = 14,
        WorldOnShutdown = 15,
        OnLuaStateClose = 16,
        MapOnCreate = 17,
        MapOnDestroy = 18,
        MapOnGridLoad = 19,
        MapOnGridUnload = 20,
        MapOnPlayerEnter = 21,
        MapOnPlayerLeave = 22,
        MapOnUpdate = 23,
        TriggerOnTrigger = 24,
        WeatherOnChange = 25,
        AuctionOnAdd = 26,
        AuctionOnRemove = 27,
        AuctionOnSuccessful = 28,
        AuctionOnExpire = 29,
        AddonOnMessage = 30,
        WorldOnDeleteCreature = 31,
        WorldOnDeleteGameObject = 32,
        OnLuaStateOpen = 33,
        GameEventStart = 34,
        GameEventStop = 35,
    }
}

hook_events! {
    PlayerEvents ("PlayerEvents") {
        OnCharacterCreate = 1,
        OnCharacterDelete = 2,
        OnLogin = 3,
        OnLogout = 4,
        OnSpellCast = 5,
        OnKillPlayer = 6,
        OnKillCreature = 7,
        OnKilledByCreature = 8,
        OnDuelRequest = 9,
        OnDuelStart = 10,
        OnDuelEnd = 11,
        OnGiveXp = 12,
        OnLevelChange = 13,
        OnMoneyChange = 14,
        OnReputationChange = 15,
        OnTalentsChange = 16,
        OnTalentsReset = 17,
        OnChat = 18,
        OnWhisper = 19,
        OnGroupChat = 20,
        OnGuildChat = 21,
        OnChannelChat = 22,
        OnEmote = 23,
        OnTextEmote = 24,
        OnSave = 25,
        OnBindToInstance = 26,
        OnUpdateZone = 27,
        OnMapChange = 28,
        OnEquip = 29,
        OnFirstLogin = 30,
        OnCanUseItem = 31,
        OnLootItem = 32,
        OnEnterCombat = 33,
        OnLeaveCombat = 34,
        OnRepop = 35,
        OnResurrect = 36,
        OnLootMoney = 37,
        OnQuestAbandon = 38,
        OnLearnTalents = 39,
        OnEnvironmentalDeath = 40,
        OnTradeAccept = 41,
        OnCommand = 42,
        OnSkillChange = 43,
        OnLearnSpell = 44,
        OnAchievementComplete = 45,
        OnDiscoverArea = 46,
        OnUpdateArea = 47,
        OnTradeInit = 48,
        OnSendMail = 49,
        OnQuestStatusChanged = 54,
    }
}

hook_events! {
    GuildEvents ("GuildEvents") {
        OnAddMember = 1,
        OnRemoveMember = 2,
        OnMotdChange = 3,
        OnInfoChange = 4,
        OnCreate = 5,
        OnDisband = 6,
        OnMoneyWithdraw = 7,
        OnMoneyDeposit = 8,
        OnItemMove = 9,
        OnEvent = 10,
        OnBankEvent = 11,
    }
}

hook_events! {
    GroupEvents ("GroupEvents") {
        OnMemberAdd = 1,
        OnMemberInvite = 2,
        OnMemberRemove = 3,
        OnLeaderChange = 4,
        OnDisband = 5,
        OnCreate = 6,
        OnMemberAccept = 7,
    }
}

hook_events! {
    VehicleEvents ("VehicleEvents") {
        OnInstall = 1,
        OnUninstall = 2,
        OnInstallAccessory = 4,
        OnAddPassenger = 5,
        OnRemovePassenger = 6,
    }
}

hook_events! {
    CreatureEvents ("CreatureEvents") {
        OnEnterCombat = 1,
        OnLeaveCombat = 2,
        OnTargetDied = 3,
        OnDied = 4,
        OnSpawn = 5,
        OnReachWp = 6,
        OnAiUpdate = 7,
        OnReceiveEmote = 8,
        OnDamageTaken = 9,
        OnPreCombat = 10,
        OnOwnerAttacked = 12,
        OnOwnerAttackedAt = 13,
        OnHitBySpell = 14,
        OnSpellHitTarget = 15,
        OnJustSummonedCreature = 19,
        OnSummonedCreatureDespawn = 20,
        OnSummonedCreatureDied = 21,
        OnSummoned = 22,
        OnReset = 23,
        OnReachHome = 24,
        OnCorpseRemoved = 26,
        OnMoveInLos = 27,
        OnDummyEffect = 30,
        OnQuestAccept = 31,
        OnQuestReward = 34,
        OnDialogStatus = 35,
        OnAdd = 36,
        OnRemove = 37,
    }
}

hook_events! {
    GameObjectEvents ("GameObjectEvents") {
        OnAiUpdate = 1,
        OnSpawn = 2,
        OnDummyEffect = 3,
        OnQuestAccept = 4,
        OnQuestReward = 5,
        OnDialogStatus = 6,
        OnDestroyed = 7,
        OnDamaged = 8,
        OnLootStateChange = 9,
        OnGoStateChanged = 10,
        OnAdd = 12,
        OnRemove = 13,
        OnUse = 14,
    }
}

hook_events! {
    SpellEvents ("SpellEvents") {
        OnCast = 1,
    }
}

hook_events! {
    ItemEvents ("ItemEvents") {
        OnDummyEffect = 1,
        OnUse = 2,
        OnQuestAccept = 3,
        OnExpire = 4,
        OnRemove = 5,
        OnAdd = 6,
        OnEquip = 7,
        OnUnequip = 8,
    }
}

hook_events! {
    GossipEvents ("GossipEvents") {
        OnHello = 1,
        OnSelect = 2,
    }
}

hook_events! {
    BgEvents ("BGEvents") {
        OnStart = 1,
        OnEnd = 2,
        OnCreate = 3,
        OnPreDestroy = 4,
    }
}

hook_events! {
    InstanceEvents ("InstanceEvents") {
        OnInitialize = 1,
        OnLoad = 2,
        OnUpdate = 3,
        OnPlayerEnter = 4,
        OnCreatureCreate = 5,
        OnGameObjectCreate = 6,
        OnCheckEncounterInProgress = 7,
    }
}
